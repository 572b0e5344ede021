use std::time::Duration;

use anyhow::Context;

use crate::models::AcademicPeriod;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    /// Upper bound on every persistence call.
    pub request_timeout: Duration,
    pub fallback_period: Option<AcademicPeriod>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections: u32 = match lookup("EVALUATION_DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("EVALUATION_DB_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let timeout_secs: u64 = match lookup("EVALUATION_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!("EVALUATION_REQUEST_TIMEOUT_SECS is not a number: {raw}")
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let fallback_period = lookup("EVALUATION_FALLBACK_PERIOD")
            .as_deref()
            .map(str::trim)
            .and_then(AcademicPeriod::parse);

        Ok(Self {
            database_url,
            max_connections,
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            fallback_period,
        })
    }
}
