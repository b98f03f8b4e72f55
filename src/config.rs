//! Configuration for the AWL gateway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::awl::{ClientConfig, SupervisorConfig};

/// awl-gateway - local REST gateway for WaterFurnace Symphony telemetry
#[derive(Parser, Debug, Clone)]
#[command(name = "awl-gateway")]
#[command(about = "Local REST gateway for the WaterFurnace Symphony (AWL) service")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Symphony account email address
    #[arg(long, env = "AWL_USERNAME")]
    pub awl_username: String,

    /// Symphony account password
    #[arg(long, env = "AWL_PASSWORD")]
    pub awl_password: String,

    /// Vendor login endpoint
    #[arg(
        long,
        env = "AWL_LOGIN_URL",
        default_value = "https://symphony.mywaterfurnace.com/account/login"
    )]
    pub awl_login_url: String,

    /// Vendor config script containing the WebSocket endpoint
    #[arg(
        long,
        env = "AWL_CONFIG_URL",
        default_value = "https://symphony.mywaterfurnace.com/assets/js/awlconfig.js.php"
    )]
    pub awl_config_url: String,

    /// Per-transaction response timeout in seconds
    #[arg(long, env = "AWL_TRANSACTION_TIMEOUT_SECS", default_value = "30")]
    pub transaction_timeout_secs: u64,

    /// Session renewal interval in seconds (the vendor cuts sessions at 1500)
    #[arg(long, env = "AWL_SESSION_RENEWAL_SECS", default_value = "1500")]
    pub session_renewal_secs: u64,

    /// Read-cache window in seconds
    #[arg(long, env = "AWL_CACHE_WINDOW_SECS", default_value = "10")]
    pub cache_window_secs: u64,

    /// Retry window for connection failures in seconds; 0 = retry forever
    #[arg(long, env = "AWL_CONNECT_RETRY_SECS", default_value = "0")]
    pub connect_retry_secs: u64,

    /// Retry window for login failures in seconds; 0 = retry forever
    #[arg(long, env = "AWL_LOGIN_RETRY_SECS", default_value = "0")]
    pub login_retry_secs: u64,

    /// Only warn about reconnect attempts after this many seconds offline
    #[arg(long, env = "WARN_AFTER_DISCONNECTED_SECS", default_value = "10")]
    pub warn_after_disconnected_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            login_url: self.awl_login_url.clone(),
            config_url: self.awl_config_url.clone(),
            transaction_timeout: Duration::from_secs(self.transaction_timeout_secs),
            renewal_interval: Duration::from_secs(self.session_renewal_secs),
            ..ClientConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let window = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        SupervisorConfig {
            connect_retry_window: window(self.connect_retry_secs),
            login_retry_window: window(self.login_retry_secs),
            ..SupervisorConfig::default()
        }
    }

    pub fn cache_window(&self) -> Duration {
        Duration::from_secs(self.cache_window_secs)
    }

    pub fn warn_after(&self) -> Duration {
        Duration::from_secs(self.warn_after_disconnected_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.awl_username.is_empty() {
            return Err("AWL_USERNAME is required".to_string());
        }
        if self.awl_password.is_empty() {
            return Err("AWL_PASSWORD is required".to_string());
        }
        if self.transaction_timeout_secs == 0 {
            return Err("AWL_TRANSACTION_TIMEOUT_SECS must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from([
            "awl-gateway",
            "--awl-username",
            "user@example.com",
            "--awl-password",
            "hunter2",
        ])
    }

    #[test]
    fn test_defaults() {
        let args = args();
        assert_eq!(args.listen.port(), 8000);
        assert_eq!(args.transaction_timeout_secs, 30);
        assert_eq!(args.session_renewal_secs, 1500);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_zero_retry_secs_means_unbounded() {
        let config = args().supervisor_config();
        assert!(config.connect_retry_window.is_none());
        assert!(config.login_retry_window.is_none());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let mut args = args();
        args.awl_password = String::new();
        assert!(args.validate().is_err());
    }
}
