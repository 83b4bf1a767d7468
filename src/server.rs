//! Server Context
//!
//! [`Server`] owns everything the core needs: the configuration, the
//! keyspace, the command table, the client registry and the memory
//! accounting collaborator. It does no I/O of its own. An event source calls
//! the four entry points and the server talks back through a [`Transport`]:
//!
//! ```text
//!   on_accept(conn)        register a client
//!   on_data(conn, bytes)   parse, execute, reply (may close the connection)
//!   on_close(conn)         free the client
//!   on_tick() -> delay     LRU clock, active expiry, opportunistic eviction
//! ```
//!
//! All state is owned by one value and mutated through `&mut self`, so the
//! event source must deliver events one at a time.

use crate::commands::{CommandError, CommandTable};
use crate::config::Config;
use crate::connection::{Client, ConnectionId, Transport, TransportError};
use crate::protocol::{parse_request, ProtocolError, Reply, RequestType};
use crate::storage::{
    active_expire_cycle, free_memory_if_needed, Dict, ExpiryConfig, Keyspace, MemoryLimits,
    MemoryUsage, Replace, SharedClock, SystemClock,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// The literal that closes a connection after its reply.
const QUIT: &[u8] = b"quit";

/// Why processing a client's input stopped early.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Unparsed input outgrew the client query buffer limit
    #[error("client query buffer of {len} bytes exceeds the {limit} byte limit")]
    QueryBufferFull { len: usize, limit: usize },

    /// A command handler panicked
    #[error("internal fault: {0}")]
    Internal(String),
}

/// Extracts a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The server core.
pub struct Server {
    config: Config,
    db: Keyspace,
    commands: CommandTable,
    clients: Dict<ConnectionId, Client>,
    next_client_id: u64,
    memory: Box<dyn MemoryUsage>,
    expiry: ExpiryConfig,
    limits: MemoryLimits,
}

impl Server {
    /// Creates a server using the system clock and the memory accounting
    /// named in the configuration.
    pub fn new(config: Config) -> Self {
        let memory = config.memory_accounting.collaborator();
        Self::with_collaborators(config, Arc::new(SystemClock), memory)
    }

    /// Creates a server with an explicit clock and memory collaborator.
    pub fn with_collaborators(
        config: Config,
        clock: SharedClock,
        memory: Box<dyn MemoryUsage>,
    ) -> Self {
        let db = Keyspace::new(0, config.hz, clock);
        let commands = CommandTable::populate();
        info!(
            commands = commands.len(),
            hz = config.hz,
            maxmemory = config.maxmemory,
            policy = %config.maxmemory_policy,
            accounting = %config.memory_accounting,
            "Server initialized"
        );

        Self {
            expiry: ExpiryConfig::with_hz(config.hz),
            limits: config.limits(),
            config,
            db,
            commands,
            clients: Dict::new(),
            next_client_id: 0,
            memory,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Keyspace {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Keyspace {
        &mut self.db
    }

    pub fn commands_mut(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, conn: ConnectionId) -> Option<&Client> {
        self.clients.find(&conn)
    }

    /// Registers a client for a newly accepted connection.
    pub fn on_accept(&mut self, conn: ConnectionId) {
        self.next_client_id += 1;
        let client = Client::new(self.next_client_id, conn, self.db.id());
        if self.clients.replace(conn, client) == Replace::Replaced {
            warn!(%conn, "Connection id reused; previous client state dropped");
        }
        debug!(%conn, client = self.next_client_id, "Client registered");
    }

    /// Frees the client of a closed connection.
    pub fn on_close(&mut self, conn: ConnectionId) {
        match self.clients.delete(&conn) {
            Ok(client) => debug!(%conn, client = client.id(), "Client freed"),
            Err(_) => trace!(%conn, "Close for unknown connection"),
        }
    }

    /// Handles bytes received on a connection.
    ///
    /// Every complete request in the client's buffer is executed in order
    /// and its reply flushed. Protocol errors and command panics are reported
    /// to the client and the connection keeps serving. Transport failures, an
    /// overfull query buffer and `quit` close it.
    pub fn on_data(&mut self, conn: ConnectionId, data: &[u8], transport: &mut dyn Transport) {
        let Ok(mut client) = self.clients.delete(&conn) else {
            warn!(%conn, bytes = data.len(), "Data for unknown connection");
            return;
        };
        client.feed(data);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_input_buffer(&mut client, transport)
        }))
        .unwrap_or_else(|payload| Err(ClientError::Internal(panic_message(payload.as_ref()))));

        let keep = match result {
            Ok(()) => true,
            Err(ClientError::Protocol(e)) => {
                warn!(%conn, error = %e, "Protocol error");
                client.discard_query_buffer();
                client.reset();
                client.add_reply(&Reply::error(format!("ERR Protocol error: {}", e)));
                Self::send_reply_to_client(&mut client, transport).is_ok()
            }
            Err(ClientError::QueryBufferFull { len, limit }) => {
                warn!(%conn, len, limit, "Closing client: query buffer limit reached");
                client.discard_query_buffer();
                client.reset();
                client.add_reply(&Reply::error(format!(
                    "ERR Protocol error: {}",
                    ClientError::QueryBufferFull { len, limit }
                )));
                if let Err(e) = Self::send_reply_to_client(&mut client, transport) {
                    debug!(%conn, error = %e, "Write failed");
                }
                false
            }
            Err(ClientError::Internal(msg)) => {
                error!(
                    %conn,
                    cmd = ?client.lastcmd(),
                    panic = %msg,
                    "Internal fault while executing command"
                );
                client.discard_query_buffer();
                client.reset();
                client.add_reply(&Reply::error("ERR internal error"));
                Self::send_reply_to_client(&mut client, transport).is_ok()
            }
            Err(ClientError::Transport(e)) => {
                debug!(%conn, error = %e, "Write failed");
                false
            }
        };

        if keep && !client.is_closing() {
            self.clients.replace(conn, client);
            return;
        }

        if let Err(e) = transport.close(conn) {
            debug!(%conn, error = %e, "Close failed");
        }
        debug!(%conn, client = client.id(), "Client closed");
    }

    /// Parses and executes every complete request in the query buffer.
    fn process_input_buffer(
        &mut self,
        c: &mut Client,
        transport: &mut dyn Transport,
    ) -> Result<(), ClientError> {
        while !c.is_closing() {
            let reqtype = match c.reqtype() {
                Some(reqtype) => reqtype,
                None => {
                    let Some(reqtype) = RequestType::classify(c.query_buf()) else {
                        break;
                    };
                    c.set_reqtype(reqtype);
                    reqtype
                }
            };

            let Some((argv, consumed)) = parse_request(reqtype, c.query_buf())? else {
                trace!(conn = %c.conn(), buffered = c.query_buf().len(), "Incomplete request");
                break;
            };
            c.consume(consumed);

            if argv.is_empty() {
                c.reset();
                continue;
            }

            c.set_argv(argv);
            self.process_command(c);
            Self::send_reply_to_client(c, transport)?;
            c.reset();
        }

        let limit = self.config.client_query_buffer_limit;
        if !c.is_closing() && c.query_buf().len() > limit {
            return Err(ClientError::QueryBufferFull {
                len: c.query_buf().len(),
                limit,
            });
        }
        Ok(())
    }

    /// Looks up and runs the command in `c.argv()`.
    fn process_command(&mut self, c: &mut Client) {
        let name = &c.argv()[0];
        trace!(
            conn = %c.conn(),
            cmd = %String::from_utf8_lossy(name),
            argc = c.argv().len(),
            "Dispatch"
        );

        if &name[..] == QUIT {
            c.add_reply(&Reply::ok());
            c.close_after_reply();
            return;
        }

        let Some(cmd) = self.commands.lookup(name) else {
            let err = CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned());
            c.add_reply(&err.into());
            return;
        };

        if !cmd.check_arity(c.argv().len()) {
            c.add_reply(&CommandError::WrongArity(cmd.name.to_string()).into());
            return;
        }

        if self.limits.maxmemory > 0 {
            if let Err(e) = free_memory_if_needed(&mut self.db, &self.limits, self.memory.as_ref())
            {
                warn!(cmd = cmd.name, error = %e, "Command rejected");
                c.add_reply(&CommandError::OutOfMemory.into());
                return;
            }
        }

        c.set_cmd(cmd);
        (cmd.proc_)(c, &mut self.db);
    }

    /// Hands the pending reply to the transport until it is fully sent or
    /// the transport stops accepting bytes. Whatever is left stays in the
    /// client's buffer until the next data event or
    /// [`Server::flush_pending_replies`].
    fn send_reply_to_client(
        c: &mut Client,
        transport: &mut dyn Transport,
    ) -> Result<(), TransportError> {
        while c.has_pending_reply() {
            let written = transport.write(c.conn(), c.pending_reply())?;
            if written == 0 {
                trace!(conn = %c.conn(), pending = c.pending_reply().len(), "Transport full");
                break;
            }
            c.advance_sent(written);
        }
        Ok(())
    }

    /// Retries replies the transport did not fully accept earlier.
    ///
    /// Clients whose transport reports an error are dropped and their
    /// connection closed.
    pub fn flush_pending_replies(&mut self, transport: &mut dyn Transport) {
        let pending: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.has_pending_reply())
            .map(|(conn, _)| *conn)
            .collect();

        for conn in pending {
            let Some(client) = self.clients.find_mut(&conn) else {
                continue;
            };
            if let Err(e) = Self::send_reply_to_client(client, transport) {
                debug!(%conn, error = %e, "Write failed while flushing");
                self.clients.delete(&conn).ok();
                if let Err(e) = transport.close(conn) {
                    debug!(%conn, error = %e, "Close failed");
                }
            }
        }
    }

    /// Periodic maintenance. Returns the delay until the next tick.
    pub fn on_tick(&mut self) -> Duration {
        self.db.refresh_lru_clock();
        self.databases_cron();
        Duration::from_millis(1000 / u64::from(self.config.hz.max(1)))
    }

    fn databases_cron(&mut self) {
        active_expire_cycle(&mut self.db, &self.expiry);

        if self.limits.maxmemory > 0 {
            if let Err(e) = free_memory_if_needed(&mut self.db, &self.limits, self.memory.as_ref())
            {
                debug!(error = %e, "Still over maxmemory after cron eviction");
            }
        }

        // TODO: schedule background snapshots from here once persistence exists.
    }
}
