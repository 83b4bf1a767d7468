//! Server Configuration
//!
//! All tunables live in [`Config`]. The binary builds one from command-line
//! flags with [`Config::parse_args`]; tests build one directly.

use crate::storage::eviction::{
    EstimatedMemory, MaxMemoryPolicy, MemoryLimits, MemoryUsage, ParsePolicyError,
    UnaccountedMemory, DEFAULT_MAXMEMORY_SAMPLES,
};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default listen backlog
pub const DEFAULT_TCP_BACKLOG: u32 = 511;

/// Default server tick frequency
pub const DEFAULT_HZ: u32 = 10;

/// Default cap on unparsed bytes buffered per client
pub const DEFAULT_QUERY_BUFFER_LIMIT: usize = 1024 * 1024;

/// Lowest accepted tick frequency
pub const MIN_HZ: u32 = 1;

/// Highest accepted tick frequency
pub const MAX_HZ: u32 = 500;

/// Errors produced while parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error(transparent)]
    InvalidPolicy(#[from] ParsePolicyError),
}

/// How used memory is measured for the `maxmemory` ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryAccounting {
    /// Always report zero bytes; the ceiling is never reached
    #[default]
    None,
    /// Sum of key + payload + fixed overhead per entry
    Estimate,
}

impl MemoryAccounting {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryAccounting::None => "none",
            MemoryAccounting::Estimate => "estimate",
        }
    }

    /// Builds the matching memory collaborator.
    pub fn collaborator(&self) -> Box<dyn MemoryUsage> {
        match self {
            MemoryAccounting::None => Box::new(UnaccountedMemory),
            MemoryAccounting::Estimate => Box::new(EstimatedMemory),
        }
    }
}

impl fmt::Display for MemoryAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryAccounting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(MemoryAccounting::None),
            "estimate" => Ok(MemoryAccounting::Estimate),
            _ => Err(ConfigError::InvalidValue {
                flag: "--memory-accounting".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Listen backlog
    pub tcp_backlog: u32,
    /// Server ticks per second
    pub hz: u32,
    /// Memory ceiling in bytes (0 = unlimited)
    pub maxmemory: u64,
    pub maxmemory_policy: MaxMemoryPolicy,
    pub maxmemory_samples: usize,
    pub memory_accounting: MemoryAccounting,
    /// Unparsed bytes a client may buffer before it is disconnected
    pub client_query_buffer_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tcp_backlog: DEFAULT_TCP_BACKLOG,
            hz: DEFAULT_HZ,
            maxmemory: 0,
            maxmemory_policy: MaxMemoryPolicy::NoEviction,
            maxmemory_samples: DEFAULT_MAXMEMORY_SAMPLES,
            memory_accounting: MemoryAccounting::None,
            client_query_buffer_limit: DEFAULT_QUERY_BUFFER_LIMIT,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Serve(Config),
    PrintHelp,
    PrintVersion,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Eviction settings derived from this configuration.
    pub fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            maxmemory: self.maxmemory,
            policy: self.maxmemory_policy,
            samples: self.maxmemory_samples,
        }
    }

    /// Parses command-line arguments (without the program name).
    pub fn parse_args<I>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };

            match arg.as_str() {
                "--host" | "-h" => config.host = value(&arg)?,
                "--port" | "-p" => config.port = parse_number(&arg, &value(&arg)?)?,
                "--tcp-backlog" => config.tcp_backlog = parse_number(&arg, &value(&arg)?)?,
                "--hz" => {
                    let hz: u32 = parse_number(&arg, &value(&arg)?)?;
                    config.hz = hz.clamp(MIN_HZ, MAX_HZ);
                }
                "--maxmemory" => config.maxmemory = parse_memory(&value(&arg)?)?,
                "--maxmemory-policy" => config.maxmemory_policy = value(&arg)?.parse()?,
                "--maxmemory-samples" => {
                    let raw = value(&arg)?;
                    let samples: usize = parse_number(&arg, &raw)?;
                    if samples == 0 {
                        return Err(ConfigError::InvalidValue {
                            flag: arg.clone(),
                            value: raw,
                        });
                    }
                    config.maxmemory_samples = samples;
                }
                "--memory-accounting" => config.memory_accounting = value(&arg)?.parse()?,
                "--client-query-buffer-limit" => {
                    let raw = value(&arg)?;
                    let limit = parse_memory(&raw).map_err(|_| ConfigError::InvalidValue {
                        flag: arg.clone(),
                        value: raw.clone(),
                    })?;
                    if limit == 0 {
                        return Err(ConfigError::InvalidValue {
                            flag: arg.clone(),
                            value: raw,
                        });
                    }
                    config.client_query_buffer_limit =
                        usize::try_from(limit).unwrap_or(usize::MAX);
                }
                "--help" => return Ok(CliAction::PrintHelp),
                "--version" | "-v" => return Ok(CliAction::PrintVersion),
                _ => return Err(ConfigError::UnknownArgument(arg.clone())),
            }
        }

        Ok(CliAction::Serve(config))
    }
}

fn parse_number<T: FromStr>(flag: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
    })
}

/// Parses a memory amount such as `100`, `64kb`, `1mb` or `2gb`.
///
/// `k`/`m`/`g` are powers of 1000, `kb`/`mb`/`gb` powers of 1024.
pub fn parse_memory(raw: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        flag: "--maxmemory".to_string(),
        value: raw.to_string(),
    };

    let lower = raw.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);

    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" => 1000,
        "kb" => 1024,
        "m" => 1000 * 1000,
        "mb" => 1024 * 1024,
        "g" => 1000 * 1000 * 1000,
        "gb" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliAction, ConfigError> {
        Config::parse_args(args.iter().map(|s| s.to_string()))
    }

    fn serve(args: &[&str]) -> Config {
        match parse(args).unwrap() {
            CliAction::Serve(config) => config,
            other => panic!("expected a config, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = serve(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_address(), "127.0.0.1:6389");
        assert_eq!(config.tcp_backlog, 511);
        assert_eq!(config.hz, 10);
        assert_eq!(config.client_query_buffer_limit, 1024 * 1024);
        assert_eq!(config.limits(), MemoryLimits::default());
    }

    #[test]
    fn test_all_flags() {
        let config = serve(&[
            "--host",
            "0.0.0.0",
            "-p",
            "7000",
            "--tcp-backlog",
            "128",
            "--hz",
            "50",
            "--maxmemory",
            "1mb",
            "--maxmemory-policy",
            "allkeys-lru",
            "--maxmemory-samples",
            "10",
            "--memory-accounting",
            "estimate",
            "--client-query-buffer-limit",
            "64kb",
        ]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.tcp_backlog, 128);
        assert_eq!(config.hz, 50);
        assert_eq!(config.maxmemory, 1024 * 1024);
        assert_eq!(config.maxmemory_policy, MaxMemoryPolicy::AllKeysLru);
        assert_eq!(config.maxmemory_samples, 10);
        assert_eq!(config.memory_accounting, MemoryAccounting::Estimate);
        assert_eq!(config.client_query_buffer_limit, 64 * 1024);
    }

    #[test]
    fn test_hz_is_clamped() {
        assert_eq!(serve(&["--hz", "0"]).hz, MIN_HZ);
        assert_eq!(serve(&["--hz", "10000"]).hz, MAX_HZ);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]), Ok(CliAction::PrintHelp));
        assert_eq!(parse(&["-v"]), Ok(CliAction::PrintVersion));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(&["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
        assert!(matches!(
            parse(&["--port", "http"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(&["--maxmemory-policy", "lfu"]),
            Err(ConfigError::InvalidPolicy(_))
        ));
        assert!(matches!(
            parse(&["--maxmemory-samples", "0"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            parse(&["--client-query-buffer-limit", "0"]),
            Err(ConfigError::InvalidValue {
                flag: "--client-query-buffer-limit".to_string(),
                value: "0".to_string(),
            })
        );
        assert_eq!(
            parse(&["--turbo"]),
            Err(ConfigError::UnknownArgument("--turbo".to_string()))
        );
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("100"), Ok(100));
        assert_eq!(parse_memory("100b"), Ok(100));
        assert_eq!(parse_memory("2k"), Ok(2000));
        assert_eq!(parse_memory("2KB"), Ok(2048));
        assert_eq!(parse_memory("3mb"), Ok(3 * 1024 * 1024));
        assert_eq!(parse_memory("1gb"), Ok(1024 * 1024 * 1024));
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("10tb").is_err());
        assert!(parse_memory("").is_err());
    }
}
