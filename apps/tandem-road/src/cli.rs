use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use crate::config::{LobbyConfig, OriginPolicy, ServerConfig, DEFAULT_ALLOWED_ORIGINS};

#[derive(Debug, Parser)]
#[command(
    name = "tandem-road",
    author,
    version,
    about = "Pairs anonymous participants and relays their connection handshake"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "TANDEM_LISTEN_ADDR", default_value = "0.0.0.0:4001")]
    pub listen_addr: String,

    /// Comma separated browser origins allowed to connect; `*` matches any run
    /// of characters.
    #[arg(long, env = "TANDEM_ALLOWED_ORIGINS", default_value = DEFAULT_ALLOWED_ORIGINS)]
    pub allowed_origins: String,

    /// Display name given to participants until they choose one.
    #[arg(long, env = "TANDEM_DEFAULT_NAME", default_value = "Guest")]
    pub default_name: String,

    /// Longer display names are truncated.
    #[arg(long, env = "TANDEM_MAX_NAME_LEN", default_value_t = 32)]
    pub max_name_len: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "TANDEM_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        let origins = OriginPolicy::parse(&cli.allowed_origins)
            .with_context(|| format!("invalid allowed origins: {}", cli.allowed_origins))?;
        let lobby = LobbyConfig::new(&cli.default_name, cli.max_name_len)
            .context("invalid lobby settings")?;
        Ok(ServerConfig {
            listen_addr,
            origins,
            lobby,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_produce_a_usable_config() {
        let cli = Cli::try_parse_from(["tandem-road"]).unwrap();
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.port(), 4001);
        assert_eq!(config.lobby, LobbyConfig::default());
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert!(config.origins.allows(Some("http://localhost:5173")));
    }

    #[test_timeout::timeout]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "tandem-road",
            "--listen-addr",
            "127.0.0.1:9000",
            "--allowed-origins",
            "https://*.example.app",
            "--default-name",
            "Stranger",
            "--max-name-len",
            "12",
        ])
        .unwrap();
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.lobby.default_name, "Stranger");
        assert_eq!(config.lobby.max_name_len, 12);
        assert!(config.origins.allows(Some("https://demo.example.app")));
        assert!(!config.origins.allows(Some("http://localhost:5173")));
    }

    #[test_timeout::timeout]
    fn bad_listen_address_is_reported() {
        let cli = Cli::try_parse_from(["tandem-road", "--listen-addr", "nowhere"]).unwrap();
        let err = ServerConfig::try_from(cli).unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }
}
