use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

/// Connection and command settings for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Name used in logs and in `NodeStats::node`.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,

    /// Deadline applied to every command handle; `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Capacity of the node event channel.
    pub event_buffer: usize,
}

impl NodeConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            name: std::env::var("NODE_NAME").unwrap_or_else(|_| "main".to_string()),
            host: std::env::var("NODE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("NODE_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()
                .context("NODE_PORT must be a port number")?,
            password: std::env::var("NODE_PASSWORD")
                .unwrap_or_else(|_| "youshallnotpass".to_string()),
            secure: std::env::var("NODE_SECURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("NODE_SECURE must be true or false")?,

            command_timeout: match std::env::var("NODE_COMMAND_TIMEOUT") {
                Ok(val) if !val.trim().is_empty() => Some(
                    humantime::parse_duration(val.trim())
                        .context("NODE_COMMAND_TIMEOUT must be a duration such as 10s")?,
                ),
                _ => None,
            },
            event_buffer: std::env::var("NODE_EVENT_BUFFER")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .context("NODE_EVENT_BUFFER must be a number")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Port and event buffer must be greater than 0
    /// - Password must not be empty
    /// - Command timeout, when set, must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("Node host must not be empty");
        }

        if self.port == 0 {
            anyhow::bail!("Node port must be greater than 0");
        }

        if self.password.is_empty() {
            anyhow::bail!("Node password must not be empty");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("Event buffer must be greater than 0");
        }

        if self.command_timeout == Some(Duration::ZERO) {
            anyhow::bail!("Command timeout must be greater than 0 when set");
        }

        self.ws_url()?;

        Ok(())
    }

    /// WebSocket endpoint of the node.
    pub fn ws_url(&self) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        Url::parse(&format!("{scheme}://{}:{}/", self.host, self.port))
            .with_context(|| format!("Invalid node address {}:{}", self.host, self.port))
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The password is never included.
    pub fn summary(&self) -> String {
        format!(
            "Node '{}': {}://{}:{}, command timeout {}, event buffer {}",
            self.name,
            if self.secure { "wss" } else { "ws" },
            self.host,
            self.port,
            self.command_timeout
                .map_or("none".to_string(), |t| humantime::format_duration(t).to_string()),
            self.event_buffer,
        )
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            host: "localhost".to_string(),
            port: 2333,
            password: "youshallnotpass".to_string(),
            secure: false,
            command_timeout: None,
            event_buffer: 256,
        }
    }
}
