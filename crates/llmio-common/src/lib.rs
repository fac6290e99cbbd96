use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 7070;
pub const DEFAULT_DB_PATH: &str = "./db/llmio.db";

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("invalid gateway config field: {0}")]
    InvalidField(&'static str),
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > config file (`llmio.json`) > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Admin bearer token. When unset every caller is treated as admin.
    pub admin_token: Option<String>,
    /// Path to the sqlite database file.
    pub db_path: String,
}

/// Optional layer used for merging gateway config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "token")]
    pub admin_token: Option<String>,
    pub db_path: Option<String>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.admin_token.is_some() {
            self.admin_token = other.admin_token;
        }
        if other.db_path.is_some() {
            self.db_path = other.db_path;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        let admin_token = self.admin_token.filter(|token| !token.trim().is_empty());
        let db_path = self.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        if db_path.trim().is_empty() {
            return Err(GatewayConfigError::InvalidField("db_path"));
        }
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            admin_token,
            db_path,
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_token: value.admin_token,
            db_path: Some(value.db_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = GatewayConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            admin_token: None,
            db_path: None,
        };
        base.overlay(GatewayConfigPatch {
            port: Some(9090),
            admin_token: Some("sk-admin".to_string()),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.admin_token.as_deref(), Some("sk-admin"));
        assert_eq!(config.db_path, DEFAULT_DB_PATH);
    }

    #[test]
    fn blank_admin_token_means_open_admin() {
        let patch = GatewayConfigPatch {
            admin_token: Some("   ".to_string()),
            ..Default::default()
        };
        let config = patch.into_config().unwrap();
        assert!(config.admin_token.is_none());
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
