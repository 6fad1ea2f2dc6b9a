use std::net::SocketAddr;

use anyhow::{Context, anyhow};
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL is not set"))?;

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned())
            .parse()
            .context("BIND_ADDR is not a socket address")?;

        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(value) => value.parse().context("DB_MAX_CONNECTIONS is not a number")?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { database_url, bind_addr, db_max_connections, allowed_origins })
    }

    pub fn cors(&self) -> anyhow::Result<CorsLayer> {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if self.allowed_origins.is_empty() {
            return Ok(cors.allow_origin(Any));
        }

        let origins = self
            .allowed_origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin).with_context(|| format!("bad origin {origin:?}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(cors.allow_origin(origins))
    }
}
