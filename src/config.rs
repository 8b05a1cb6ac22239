// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line configuration. This server takes exactly two positional
//! arguments (`ip_address` and `port_number`); everything else is a fixed
//! operational constant, not something an operator tunes per invocation.

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};

/// Document root every request target is resolved under. Fixed, not an
/// operator-supplied setting.
pub const ROOT: &str = "/var/www/html";

/// Seconds a connection may sit idle (no readable/writable event) before the
/// reactor closes it.
pub const IDLE_TIMEOUT_SECS: u64 = 15;

/// Cadence of the `SIGALRM` that drives timer-heap ticks.
pub const TICK_INTERVAL_SECS: u32 = 5;

/// Backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: u32 = 4096;

/// Upper bound on simultaneously open connections.
pub const MAX_CONNECTIONS: usize = 100_000;

/// Capacity of the `mio::Events` buffer drained per `poll` call.
pub const EVENT_BATCH_SIZE: usize = 4096;

/// Parsed, validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub root: String,
    pub workers: usize,
}

/// Why argument parsing failed; `Display` doubles as the usage message
/// printed to stderr.
#[derive(Debug)]
pub enum ConfigError {
    WrongArgCount { program: String },
    InvalidAddress(String),
    InvalidPort(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::WrongArgCount { program } => {
                write!(f, "usage: {program} ip_address port_number")
            }
            ConfigError::InvalidAddress(s) => write!(f, "invalid ip_address: {s}"),
            ConfigError::InvalidPort(s) => write!(f, "invalid port_number: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Parses `argv` (including the program name at index 0) into a config
    /// serving the fixed document root [`ROOT`], using one worker thread per
    /// available core.
    pub fn from_args<I: IntoIterator<Item = String>>(argv: I) -> Result<Self, ConfigError> {
        let mut args = argv.into_iter();
        let program = args.next().unwrap_or_else(|| "kestrel".to_string());
        let ip = args.next().ok_or_else(|| ConfigError::WrongArgCount {
            program: program.clone(),
        })?;
        let port = args.next().ok_or(ConfigError::WrongArgCount { program })?;

        if args.next().is_some() {
            return Err(ConfigError::InvalidPort(port));
        }

        let ip: IpAddr = ip.parse().map_err(|_| ConfigError::InvalidAddress(ip.clone()))?;
        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidPort(port.clone()))?;

        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            root: ROOT.to_string(),
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_ip_and_port() {
        let cfg = ServerConfig::from_args(args(&["kestrel", "127.0.0.1", "8080"])).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.root, ROOT);
    }

    #[test]
    fn missing_port_is_wrong_arg_count() {
        let err = ServerConfig::from_args(args(&["kestrel", "127.0.0.1"])).unwrap_err();
        assert!(matches!(err, ConfigError::WrongArgCount { .. }));
    }

    #[test]
    fn trailing_extra_argument_is_rejected() {
        let err = ServerConfig::from_args(args(&["kestrel", "127.0.0.1", "8080", "extra"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }

    #[test]
    fn malformed_ip_is_rejected() {
        let err = ServerConfig::from_args(args(&["kestrel", "not-an-ip", "8080"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = ServerConfig::from_args(args(&["kestrel", "127.0.0.1", "not-a-port"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }
}
