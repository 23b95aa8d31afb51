use std::net::SocketAddr;

use serde::Deserialize;

/// Application configuration, merged from the config file and from
/// `VERDICT_`-prefixed environment variables.
#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// Address to listen on. Defaults to localhost on port 8000.
    pub listen_address: Option<SocketAddr>,
    /// Database connection string.
    #[serde(default = "default_db")]
    pub db: String,
    /// Optional metrics exporter.
    pub metrics: Option<MetricConfig>,
}

fn default_db() -> String {
    "sqlite://data/verdict.db".into()
}

/// Where metric instruments report to.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricConfig {
    PrometheusPush(PrometheusPushConfig),
}

/// Push-gateway settings for Prometheus.
#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusPushConfig {
    /// Endpoint of the push gateway.
    pub url: String,
}
