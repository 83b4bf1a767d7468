//! Command Handlers
//!
//! ### String Commands
//! - `GET key` - Get a key's value
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]` - Set a key
//!
//! ### Key Commands
//! - `EXPIRE key seconds` - Set a relative expiry
//! - `TTL key` - Remaining time to live in seconds
//! - `PTTL key` - Remaining time to live in milliseconds
//!
//! Every handler has the [`CommandProc`](super::CommandProc) signature. The
//! argument count has already been checked against the command's arity when
//! a handler runs, so `argv` indexing up to the arity is safe.

use crate::connection::Client;
use crate::protocol::Reply;
use crate::storage::{Keyspace, Payload, RedisObject};
use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

/// Problems with a command or its arguments. Each one becomes an error reply
/// and the connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}

type CommandResult = Result<Reply, CommandError>;

/// Appends the outcome of a handler to the client's reply buffer.
fn add_result(c: &mut Client, result: CommandResult) {
    let reply = result.unwrap_or_else(Reply::from);
    trace!(client = c.id(), reply = %reply, "Reply");
    c.add_reply(&reply);
}

/// Parses a signed decimal integer argument.
pub fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

// ============================================================================
// String Commands
// ============================================================================

/// GET key
pub fn get_command(c: &mut Client, db: &mut Keyspace) {
    let result = get_generic(db, c.argv());
    add_result(c, result);
}

fn get_generic(db: &mut Keyspace, argv: &[Bytes]) -> CommandResult {
    match db.lookup(&argv[1]) {
        None => Ok(Reply::null_bulk()),
        Some(obj) => match obj.payload() {
            Payload::Str(data) => Ok(Reply::Bulk(data.clone())),
            Payload::List(_) => Err(CommandError::WrongType),
        },
    }
}

/// Options accepted by SET.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SetOptions {
    nx: bool,
    xx: bool,
    /// Relative expiry in milliseconds
    expire_ms: Option<i64>,
}

fn parse_set_options(args: &[Bytes]) -> Result<SetOptions, CommandError> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < args.len() {
        let opt = &args[i];
        let next = args.get(i + 1);

        if opt.eq_ignore_ascii_case(b"nx") {
            opts.nx = true;
        } else if opt.eq_ignore_ascii_case(b"xx") {
            opts.xx = true;
        } else if opt.eq_ignore_ascii_case(b"ex") || opt.eq_ignore_ascii_case(b"px") {
            let Some(value) = next else {
                return Err(CommandError::Syntax);
            };
            let amount = parse_i64(value)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpireTime("set"));
            }
            let ms = if opt.eq_ignore_ascii_case(b"ex") {
                amount.checked_mul(1000).ok_or(CommandError::NotInteger)?
            } else {
                amount
            };
            opts.expire_ms = Some(ms);
            i += 1;
        } else {
            return Err(CommandError::Syntax);
        }
        i += 1;
    }

    if opts.nx && opts.xx {
        return Err(CommandError::Syntax);
    }
    Ok(opts)
}

/// SET key value [NX|XX] [EX seconds|PX milliseconds]
pub fn set_command(c: &mut Client, db: &mut Keyspace) {
    let result = set_generic(db, c.argv());
    add_result(c, result);
}

fn set_generic(db: &mut Keyspace, argv: &[Bytes]) -> CommandResult {
    let opts = parse_set_options(&argv[3..])?;
    let key = &argv[1];

    if opts.nx || opts.xx {
        let exists = db.lookup(key).is_some();
        if (opts.nx && exists) || (opts.xx && !exists) {
            return Ok(Reply::null_bulk());
        }
    }

    let when = match opts.expire_ms {
        Some(ms) => Some(
            db.now_ms()
                .checked_add(ms)
                .ok_or(CommandError::InvalidExpireTime("set"))?,
        ),
        None => None,
    };

    let value = RedisObject::string(argv[2].clone(), db.lru_clock());
    db.set_key(key.clone(), value);
    match when {
        Some(when) => {
            db.set_expire(key, when);
        }
        None => {
            db.remove_expire(key);
        }
    }
    Ok(Reply::ok())
}

// ============================================================================
// Key Commands
// ============================================================================

/// EXPIRE key seconds
///
/// A non-positive timeout sets a deadline that is already in the past; the
/// key is removed by the next lookup or expire cycle.
pub fn expire_command(c: &mut Client, db: &mut Keyspace) {
    let result = expire_generic(db, c.argv());
    add_result(c, result);
}

fn expire_generic(db: &mut Keyspace, argv: &[Bytes]) -> CommandResult {
    let key = &argv[1];
    let seconds = parse_i64(&argv[2])?;
    let when = seconds
        .checked_mul(1000)
        .and_then(|ms| db.now_ms().checked_add(ms))
        .ok_or(CommandError::InvalidExpireTime("expire"))?;

    if db.lookup(key).is_none() {
        return Ok(Reply::czero());
    }
    db.set_expire(key, when);
    Ok(Reply::cone())
}

/// TTL key
pub fn ttl_command(c: &mut Client, db: &mut Keyspace) {
    let result = ttl_generic(db, c.argv(), false);
    add_result(c, result);
}

/// PTTL key
pub fn pttl_command(c: &mut Client, db: &mut Keyspace) {
    let result = ttl_generic(db, c.argv(), true);
    add_result(c, result);
}

/// Replies -2 for a missing key, -1 for a key without expiry, or the
/// remaining time rounded to the nearest second (or in milliseconds).
fn ttl_generic(db: &mut Keyspace, argv: &[Bytes], output_ms: bool) -> CommandResult {
    let key = &argv[1];
    if db.lookup(key).is_none() {
        return Ok(Reply::integer(-2));
    }

    let expire = db.get_expire(key);
    if expire == -1 {
        return Ok(Reply::integer(-1));
    }

    let ttl = (expire - db.now_ms()).max(0);
    if output_ms {
        Ok(Reply::integer(ttl))
    } else {
        Ok(Reply::integer((ttl + 500) / 1000))
    }
}
