use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingVar(&'static str),
    #[error("invalid value for {0}: {1}")]
    InvalidVar(&'static str, String),
}

/// Twilio credentials and send tuning for the WhatsApp gateway.
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender address, e.g. "whatsapp:+14155238886".
    pub from_number: String,
    pub api_base_url: String,
    pub send_timeout: Duration,
}

/// Worker and queue tuning knobs. These are operational settings, not
/// correctness requirements, so they all carry defaults.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Number of concurrent queue consumers (campaigns processed in parallel).
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Hard ceiling on one gateway send; a timed-out call counts as a send
    /// failure for that contact.
    pub send_timeout: Duration,
    pub max_attempts: i32,
    /// Base delay for exponential retry backoff (doubles per attempt).
    pub backoff_base: Duration,
    /// Initial delay applied to freshly enqueued jobs.
    pub enqueue_delay: Duration,
    /// Terminal jobs older than this are pruned from the queue table.
    pub job_retention: Duration,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub jwt_secret: String,
    pub twilio: TwilioConfig,
    pub worker: WorkerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = opt_var("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidVar("LISTEN_ADDR", format!("{e}")))?;

        let database_url = require_var("DATABASE_URL")?;
        let jwt_secret = require_var("JWT_SECRET")?;

        let twilio = TwilioConfig {
            account_sid: require_var("TWILIO_ACCOUNT_SID")?,
            auth_token: require_var("TWILIO_AUTH_TOKEN")?,
            from_number: require_var("TWILIO_WHATSAPP_FROM")?,
            api_base_url: opt_var("TWILIO_API_BASE_URL")
                .unwrap_or_else(|| "https://api.twilio.com".to_string()),
            send_timeout: Duration::from_millis(parse_var("TWILIO_SEND_TIMEOUT_MS", 15_000)?),
        };

        let worker = WorkerConfig {
            concurrency: parse_var("WORKER_CONCURRENCY", 2)? as usize,
            poll_interval: Duration::from_millis(parse_var("WORKER_POLL_INTERVAL_MS", 1_000)?),
            send_timeout: Duration::from_millis(parse_var("WORKER_SEND_TIMEOUT_MS", 20_000)?),
            max_attempts: parse_var("JOB_MAX_ATTEMPTS", 3)? as i32,
            backoff_base: Duration::from_millis(parse_var("JOB_BACKOFF_BASE_MS", 5_000)?),
            enqueue_delay: Duration::from_millis(parse_var("JOB_ENQUEUE_DELAY_MS", 1_000)?),
            job_retention: Duration::from_secs(parse_var("JOB_RETENTION_SECS", 86_400)?),
        };

        Ok(ServerConfig {
            listen_addr,
            database_url,
            jwt_secret,
            twilio,
            worker,
        })
    }
}

fn opt_var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    opt_var(name).ok_or(ConfigError::MissingVar(name))
}

fn parse_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match opt_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar(name, raw)),
        None => Ok(default),
    }
}
