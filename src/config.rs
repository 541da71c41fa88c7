//! Server process configuration.
//!
//! Parsed by hand from argv, with the `PORT` environment variable as the
//! default port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Default listen port when neither `--port` nor `PORT` is given.
pub const DEFAULT_PORT: u16 = 3000;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./contacts.idlink";

/// Errors produced while parsing the command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{flag} requires a value")]
    MissingValue { flag: String },

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(ConfigError::InvalidValue {
                what: "log format",
                value: other.to_string(),
            }),
        }
    }
}

/// Where contacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Durable store in the given directory.
    Persistent(PathBuf),
    /// Process-local store, lost on exit.
    InMemory,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Backing store.
    pub storage: StorageMode,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            storage: StorageMode::Persistent(PathBuf::from(DEFAULT_DATA_DIR)),
            log_format: LogFormat::default(),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the server.
    Serve(ServerConfig),
    /// Print usage and exit.
    Help,
}

/// Usage text for `--help`.
pub const USAGE: &str = "\
idlink-server - contact identity consolidation over HTTP

USAGE:
    idlink-server [OPTIONS]

OPTIONS:
    -p, --port <PORT>          Port to listen on [default: $PORT or 3000]
        --host <ADDR>          Address to bind [default: 127.0.0.1]
    -d, --data-dir <DIR>       Data directory [default: ./contacts.idlink]
        --in-memory            Keep contacts in memory only
        --log-format <FORMAT>  pretty | json [default: pretty]
    -h, --help                 Print help information";

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        what: "port number",
        value: value.to_string(),
    })
}

impl ServerConfig {
    /// Parses `args` (without the program name).
    ///
    /// `env_port` is the value of `PORT`, if set; `--port` overrides it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown flags, missing values or
    /// unparsable values.
    pub fn parse<I>(args: I, env_port: Option<&str>) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        if let Some(port) = env_port {
            config.addr.set_port(parse_port(port)?);
        }

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next().ok_or_else(|| ConfigError::MissingValue {
                    flag: flag.to_string(),
                })
            };

            match arg.as_str() {
                "--port" | "-p" => {
                    let port = parse_port(&value(&arg)?)?;
                    config.addr.set_port(port);
                }
                "--host" => {
                    let raw = value(&arg)?;
                    let ip: IpAddr = raw.parse().map_err(|_| ConfigError::InvalidValue {
                        what: "host address",
                        value: raw.clone(),
                    })?;
                    config.addr.set_ip(ip);
                }
                "--data-dir" | "-d" => {
                    config.storage = StorageMode::Persistent(PathBuf::from(value(&arg)?));
                }
                "--in-memory" => config.storage = StorageMode::InMemory,
                "--log-format" => config.log_format = value(&arg)?.parse()?,
                "--help" | "-h" => return Ok(Command::Help),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Command::Serve(config))
    }
}
