//! Command Table
//!
//! Maps command names to their handlers. Names are matched exactly and the
//! registered names are lowercase, so `GET` is an unknown command while
//! `get` is not.

use crate::commands::handler::{
    expire_command, get_command, pttl_command, set_command, ttl_command,
};
use crate::connection::Client;
use crate::storage::{Dict, DictError, Keyspace};
use std::fmt;

/// Signature shared by every command handler. The handler reads its
/// arguments from the client and appends its reply to the client.
pub type CommandProc = fn(&mut Client, &mut Keyspace);

/// A registered command.
#[derive(Clone, Copy)]
pub struct RedisCommand {
    pub name: &'static str,
    pub proc_: CommandProc,
    /// Exact argument count including the command name, or `-N` for
    /// "at least N"
    pub arity: i32,
}

impl RedisCommand {
    /// Returns true if `argc` arguments (including the name) are acceptable.
    pub fn check_arity(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = i64::from(self.arity);
        if arity >= 0 {
            argc == arity
        } else {
            argc >= -arity
        }
    }
}

impl fmt::Debug for RedisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCommand")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The commands served out of the box.
pub const DEFAULT_COMMANDS: &[RedisCommand] = &[
    RedisCommand {
        name: "get",
        proc_: get_command,
        arity: 2,
    },
    RedisCommand {
        name: "set",
        proc_: set_command,
        arity: -3,
    },
    RedisCommand {
        name: "expire",
        proc_: expire_command,
        arity: 3,
    },
    RedisCommand {
        name: "ttl",
        proc_: ttl_command,
        arity: 2,
    },
    RedisCommand {
        name: "pttl",
        proc_: pttl_command,
        arity: 2,
    },
];

/// Name to command lookup.
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: Dict<&'static str, RedisCommand>,
}

impl CommandTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding [`DEFAULT_COMMANDS`].
    pub fn populate() -> Self {
        let mut table = Self::new();
        for cmd in DEFAULT_COMMANDS {
            // Default names are distinct
            let _ = table.register(*cmd);
        }
        table
    }

    /// Adds a command. Fails if the name is already taken.
    pub fn register(&mut self, cmd: RedisCommand) -> Result<(), DictError> {
        self.commands.add(cmd.name, cmd)
    }

    /// Finds a command by its exact name.
    pub fn lookup(&self, name: &[u8]) -> Option<RedisCommand> {
        let name = std::str::from_utf8(name).ok()?;
        self.commands.find(name).copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Client, _: &mut Keyspace) {}

    #[test]
    fn test_populate() {
        let table = CommandTable::populate();
        assert_eq!(table.len(), DEFAULT_COMMANDS.len());
        for name in ["get", "set", "expire", "ttl", "pttl"] {
            assert!(table.lookup(name.as_bytes()).is_some(), "{name}");
        }
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let table = CommandTable::populate();
        assert!(table.lookup(b"GET").is_none());
        assert!(table.lookup(b"Get").is_none());
        assert!(table.lookup(b"\xff\xfe").is_none());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut table = CommandTable::populate();
        let dup = RedisCommand {
            name: "get",
            proc_: noop,
            arity: 1,
        };
        assert_eq!(table.register(dup), Err(DictError::Exists));
        assert_eq!(table.lookup(b"get").unwrap().arity, 2);
    }

    #[test]
    fn test_arity() {
        let exact = RedisCommand {
            name: "x",
            proc_: noop,
            arity: 2,
        };
        assert!(exact.check_arity(2));
        assert!(!exact.check_arity(1));
        assert!(!exact.check_arity(3));

        let at_least = RedisCommand {
            name: "y",
            proc_: noop,
            arity: -3,
        };
        assert!(!at_least.check_arity(2));
        assert!(at_least.check_arity(3));
        assert!(at_least.check_arity(7));
    }
}
