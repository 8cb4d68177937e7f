use serde::Deserialize;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use anyhow::{Context, Result};
use backtrace::Backtrace;
use log::error;

// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// REST server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Static login pair, token signing secret and the shared ingestion token.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub jwt_secret: String,
    pub api_token: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub resend_key: String,
    #[serde(default = "default_message_id_domain")]
    pub message_id_domain: String,
    /// Records kept per direction before the oldest are evicted.
    #[serde(default = "default_max_emails")]
    pub max_emails: u32,
    #[serde(default)]
    pub notify_on_receive: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string() }
    }
}

fn default_token_ttl_hours() -> i64 {
    30 * 24
}

fn default_message_id_domain() -> String {
    "seedmail.com".to_string()
}

fn default_max_emails() -> u32 {
    500
}

pub fn load_settings(path: &Path) -> Result<Config> {
    // Open the YAML file
    let file = File::open(path).map_err(|err| {
        error!("Error: {}", err);

        // Capture and print the backtrace
        let backtrace = Backtrace::new();
        error!("Backtrace:\n{:?}", backtrace);
        err
    }).with_context(|| format!("Cannot find settings at {}", path.display()))?;

    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    let config: Config = serde_yaml::from_reader(reader).map_err(|err| {
        error!("Error: {}", err);

        let backtrace = Backtrace::new();
        error!("Backtrace:\n{:?}", backtrace);
        err
    }).context("Cannot deserialize settings")?;

    Ok(config)
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        server: ServerConfig { host: "127.0.0.1".to_string(), port: 0 },
        database: DatabaseConfig { path: ":memory:".to_string() },
        auth: AuthConfig {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            jwt_secret: "test-secret".to_string(),
            api_token: "ingest-token".to_string(),
            token_ttl_hours: default_token_ttl_hours(),
        },
        mail: MailConfig {
            resend_key: "re_test".to_string(),
            message_id_domain: default_message_id_domain(),
            max_emails: default_max_emails(),
            notify_on_receive: false,
        },
        log: LogConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_settings_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "server:\n  host: 0.0.0.0\n  port: 3000\n\
             database:\n  path: mail.db\n\
             auth:\n  username: admin\n  password: pw\n  jwt_secret: s\n  api_token: t\n\
             mail:\n  resend_key: re_123\n"
        )
        .unwrap();

        let config = load_settings(file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.token_ttl_hours, 720);
        assert_eq!(config.mail.max_emails, 500);
        assert_eq!(config.mail.message_id_domain, "seedmail.com");
        assert!(!config.mail.notify_on_receive);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_load_settings_missing_file_is_error() {
        assert!(load_settings(Path::new("/nonexistent/settings.yaml")).is_err());
    }
}
