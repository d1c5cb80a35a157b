//! Daemon configuration.
//!
//! Everything is settable from the command line or the environment;
//! `.env` files are honored via dotenvy at startup.

use std::time::Duration;

use clap::Parser;

/// Stratus control plane daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "stratus", version, about)]
pub struct Settings {
    /// Address to bind the HTTP surface to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port for the HTTP surface
    #[arg(long, env = "PORT", default_value_t = 8500)]
    pub port: u16,

    /// Catalog connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://stratus.db")]
    pub database_url: String,

    /// Bearer token injected into every worker-node request
    #[arg(long, env = "NODE_AUTH_TOKEN", default_value = "stratus-dev-node-token")]
    pub node_auth_token: String,

    /// Shared secret forwarded as `x-signature` to SQL services
    #[arg(long, env = "SQL_SIGNING_KEY", default_value = "stratus-dev-sql-key")]
    pub sql_signing_key: String,

    /// Seconds between node liveness sweeps
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value_t = 10)]
    pub health_check_interval_secs: u64,

    /// Seconds between managed-service health sweeps
    #[arg(long, env = "SERVICE_HEALTH_CHECK_INTERVAL", default_value_t = 30)]
    pub service_health_check_interval_secs: u64,

    /// Seconds between usage-accounting sweeps
    #[arg(long, env = "USAGE_TRACKING_INTERVAL", default_value_t = 300)]
    pub usage_tracking_interval_secs: u64,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Settings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn service_health_check_interval(&self) -> Duration {
        Duration::from_secs(self.service_health_check_interval_secs)
    }

    pub fn usage_tracking_interval(&self) -> Duration {
        Duration::from_secs(self.usage_tracking_interval_secs)
    }

    /// Settings for tests: in-memory catalog, generous defaults.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            node_auth_token: "test-token".to_string(),
            sql_signing_key: "test-sql-key".to_string(),
            health_check_interval_secs: 10,
            service_health_check_interval_secs: 30,
            usage_tracking_interval_secs: 300,
            verbose: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse_from(["stratus"]);
        assert_eq!(settings.port, 8500);
        assert_eq!(settings.database_url, "sqlite://stratus.db");
        assert_eq!(settings.health_check_interval_secs, 10);
        assert_eq!(settings.service_health_check_interval_secs, 30);
    }

    #[test]
    fn test_flag_overrides() {
        let settings = Settings::parse_from([
            "stratus",
            "--port",
            "9000",
            "--health-check-interval-secs",
            "5",
        ]);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.health_check_interval(), Duration::from_secs(5));
    }
}
