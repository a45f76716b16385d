use std::fs::read_to_string;
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

/// SSL configuration shared by every listener that can terminate TLS.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Ssl {
    ///
    /// SSL private key file.
    ///
    pub private_key: String,
    ///
    /// SSL certificate chain file.
    ///
    pub certificate_chain: String,
}

/// A listener this node binds. Every interface speaks the same framed
/// protocol; the only thing that differs is whether the socket
/// terminates TLS first.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum Interface {
    Tcp {
        listen: SocketAddr,
        /// Roles connections accepted on this interface are allowed to
        /// claim. Absent means unrestricted, equivalent to listing every
        /// role. Unrecognized entries are rejected at load time.
        #[serde(default)]
        roles: Option<Vec<String>>,
    },
    Tls {
        listen: SocketAddr,
        ssl: Ssl,
        #[serde(default)]
        roles: Option<Vec<String>>,
    },
}

impl Interface {
    pub fn listen(&self) -> SocketAddr {
        match self {
            Interface::Tcp { listen, .. } => *listen,
            Interface::Tls { listen, .. } => *listen,
        }
    }

    /// Parse this interface's configured role names, falling back to
    /// every role when none were listed. Returns an error naming the
    /// first unrecognized role so a typo in the config fails loudly
    /// rather than silently admitting nothing.
    pub fn roles(&self) -> Result<Vec<service::session::Role>> {
        let names = match self {
            Interface::Tcp { roles, .. } => roles,
            Interface::Tls { roles, .. } => roles,
        };
        match names {
            None => Ok(service::session::Role::all()),
            Some(names) => names
                .iter()
                .map(|name| {
                    service::session::Role::parse(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown role {name:?} in interface config"))
                })
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// Interfaces this node listens on. Multiple addresses, mixed
    /// plaintext and TLS, can be bound at once.
    ///
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    ///
    /// Ceiling on concurrently hosted identities.
    ///
    #[serde(default = "Server::max_hosted_identities")]
    pub max_hosted_identities: usize,
    ///
    /// Directory where profile images are written.
    ///
    #[serde(default = "Server::images_dir")]
    pub images_dir: String,
}

impl Server {
    fn max_hosted_identities() -> usize {
        10_000
    }

    fn images_dir() -> String {
        "./images".to_string()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            max_hosted_identities: Self::max_hosted_identities(),
            images_dir: Self::images_dir(),
        }
    }
}

/// Paths to this node's own persisted Ed25519 keypair, handed back to
/// peers as `server_public_key` during `StartConversation`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Keys {
    pub public_key_path: String,
    pub private_key_path: String,
}

/// This node's own identity configuration, as opposed to the identities
/// it hosts on behalf of others.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    /// Absent means this node generates a fresh in-memory keypair every
    /// time it starts, rather than persisting one across restarts.
    #[serde(default)]
    pub keys: Option<Keys>,
}

/// Outbound connection to the neighborhood directory oracle. Absent when
/// this node does not participate in neighbor mirroring.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Directory {
    pub address: String,
    /// Name this node registers itself under with the directory, so other
    /// nodes' `NeighborhoodChangedNotification` entries can reference it.
    pub server_id: String,
    /// Port advertised to the directory for other nodes to reach this one
    /// as a neighbor.
    pub advertise_port: u16,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub directory: Option<Directory>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Path to the node's TOML configuration file.
    ///
    /// Example: identity-node --config /etc/identity-node/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Parse command-line arguments and load the configuration file they
    /// point at.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(&Cli::parse().config)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.max_hosted_identities, 10_000);
        assert!(config.server.interfaces.is_empty());
        assert!(config.directory.is_none());
    }

    #[test]
    fn parses_a_tcp_and_tls_interface() {
        let toml = r#"
            [[server.interfaces]]
            transport = "tcp"
            listen = "127.0.0.1:9944"

            [[server.interfaces]]
            transport = "tls"
            listen = "127.0.0.1:9945"
            ssl = { private-key = "key.pem", certificate-chain = "chain.pem" }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.interfaces.len(), 2);
    }
}
