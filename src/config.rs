use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Responder endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default silent mode; a request's `?silent=` overrides it
    #[serde(default)]
    pub silent: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7878
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            silent: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pre-distributed trust material.
///
/// Both sides name the responder's public value file. Only the responder
/// names the private value file.
#[derive(Debug, Deserialize, Clone)]
pub struct TrustConfig {
    /// Encoded trusted public value (`*.pv`)
    pub public_value: PathBuf,
    /// Encoded private value (`*.x`), responder only
    #[serde(default)]
    pub private_value: Option<PathBuf>,
    /// Expected DH parameters (`*.dh`); checked against the public value
    #[serde(default)]
    pub dh_params: Option<PathBuf>,
    /// Peer id -> symmetric key file (`*.key`) for channels that skip the
    /// handshake
    #[serde(default)]
    pub preshared: HashMap<String, PathBuf>,
}

/// Request type tag to handler bindings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommandsConfig {
    /// type tag -> handler name
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    /// type tag -> type tag tried next when no binding matches
    #[serde(default)]
    pub fallbacks: HashMap<String, String>,
    /// Handler for anything left unresolved
    #[serde(default)]
    pub default: Option<String>,
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub trust: TrustConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // e.g., SEALBUS_SERVER__PORT, SEALBUS_TRUST__PRIVATE_VALUE
            .add_source(
                Environment::with_prefix("SEALBUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"
            [trust]
            public_value = "keys/bob.pv"
            "#,
        );
        assert_eq!(config.server.bind_addr(), "0.0.0.0:7878");
        assert!(!config.server.silent);
        assert!(config.trust.private_value.is_none());
        assert!(config.trust.preshared.is_empty());
        assert!(config.commands.bindings.is_empty());
        assert!(config.commands.default.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            silent = true

            [trust]
            public_value = "keys/bob.pv"
            private_value = "keys/bob.x"
            dh_params = "keys/group.dh"

            [trust.preshared]
            carol = "keys/carol.key"

            [commands]
            default = "discard"

            [commands.bindings]
            string = "text"

            [commands.fallbacks]
            greeting = "string"
            "#,
        );
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9000");
        assert!(config.server.silent);
        assert_eq!(config.trust.private_value, Some(PathBuf::from("keys/bob.x")));
        assert_eq!(config.commands.bindings.get("string").map(String::as_str), Some("text"));
        assert_eq!(config.commands.fallbacks.get("greeting").map(String::as_str), Some("string"));
        assert_eq!(
            config.trust.preshared.get("carol"),
            Some(&PathBuf::from("keys/carol.key"))
        );
        assert_eq!(config.commands.default.as_deref(), Some("discard"));
    }

    #[test]
    fn test_trust_section_is_required() {
        let result: Result<AppConfig, _> = Config::builder()
            .add_source(File::from_str("[server]\nport = 1", FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }
}
