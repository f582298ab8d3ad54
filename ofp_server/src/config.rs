use std::{env, time::Duration};

use log::*;
use ofp_common::Secret;
use ofp_engine::{BackoffPolicy, FulfilmentConfig};

const DEFAULT_OFP_HOST: &str = "127.0.0.1";
const DEFAULT_OFP_PORT: u16 = 8360;
const DEFAULT_BROKER_QUEUE: &str = "orders-queue";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_PROCESSING_DELAY_MS: u64 = 5_000;
const DEFAULT_CLAIM_LEASE_SECS: u64 = 60;
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 12;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
const DEFAULT_OUTBOX_BATCH_SIZE: i64 = 50;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Broker connection details. When absent, the server runs in database-only mode: orders are
    /// still finalized by the outbox relay, but no events leave the process.
    pub broker: Option<BrokerConfig>,
    /// How often the outbox relay polls for unprocessed records.
    pub poll_interval: Duration,
    /// The simulated fulfilment work per order.
    pub processing_delay: Duration,
    /// How long a consumer may hold an order in `Processing` before another consumer may reclaim it.
    pub claim_lease: Duration,
    pub max_delivery_attempts: u32,
    pub retry_backoff: Duration,
    pub outbox_batch_size: i64,
}

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// The redis connection URL, e.g. "redis://127.0.0.1:6379". Treated as a secret since it may
    /// embed credentials.
    pub url: Secret<String>,
    pub queue: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OFP_HOST.to_string(),
            port: DEFAULT_OFP_PORT,
            database_url: String::default(),
            broker: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            processing_delay: Duration::from_millis(DEFAULT_PROCESSING_DELAY_MS),
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            outbox_batch_size: DEFAULT_OUTBOX_BATCH_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("OFP_HOST").ok().unwrap_or_else(|| DEFAULT_OFP_HOST.into());
        let port = env::var("OFP_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for OFP_PORT. {e} Using the default, {DEFAULT_OFP_PORT}, instead."
                    );
                    DEFAULT_OFP_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_OFP_PORT);
        let database_url = env::var("OFP_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ OFP_DATABASE_URL is not set. Please set it to the URL for the order database.");
            String::default()
        });
        let broker = BrokerConfig::try_from_env();
        if broker.is_none() {
            warn!(
                "🪛️ OFP_BROKER_URL is not set. The server will run without a message broker; orders will be \
                 finalized by the outbox relay only."
            );
        }
        let poll_interval = duration_from_env_ms("OFP_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        let processing_delay = duration_from_env_ms("OFP_PROCESSING_DELAY_MS", DEFAULT_PROCESSING_DELAY_MS);
        let retry_backoff = duration_from_env_ms("OFP_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS);
        let claim_lease = env::var("OFP_CLAIM_LEASE_SECS")
            .ok()
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for OFP_CLAIM_LEASE_SECS. {e}"))
                    .ok()
            })
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS));
        let max_delivery_attempts = env::var("OFP_MAX_DELIVERY_ATTEMPTS")
            .ok()
            .and_then(|s| {
                s.parse::<u32>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for OFP_MAX_DELIVERY_ATTEMPTS. {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_MAX_DELIVERY_ATTEMPTS);
        let outbox_batch_size = env::var("OFP_OUTBOX_BATCH_SIZE")
            .ok()
            .and_then(|s| {
                s.parse::<i64>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for OFP_OUTBOX_BATCH_SIZE. {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_OUTBOX_BATCH_SIZE);
        Self {
            host,
            port,
            database_url,
            broker,
            poll_interval,
            processing_delay,
            claim_lease,
            max_delivery_attempts,
            retry_backoff,
            outbox_batch_size,
        }
    }

    /// The engine-facing slice of this configuration.
    pub fn fulfilment_config(&self) -> FulfilmentConfig {
        FulfilmentConfig {
            processing_delay: self.processing_delay,
            claim_lease: self.claim_lease,
            backoff: BackoffPolicy { base: self.retry_backoff, max_attempts: self.max_delivery_attempts },
            batch_size: self.outbox_batch_size,
        }
    }
}

impl BrokerConfig {
    pub fn try_from_env() -> Option<Self> {
        let url = env::var("OFP_BROKER_URL").ok()?;
        let queue = env::var("OFP_BROKER_QUEUE").ok().unwrap_or_else(|| {
            info!("🪛️ OFP_BROKER_QUEUE is not set. Using the default queue name, '{DEFAULT_BROKER_QUEUE}'.");
            DEFAULT_BROKER_QUEUE.into()
        });
        Some(Self { url: Secret::new(url), queue })
    }
}

fn duration_from_env_ms(var: &str, default_ms: u64) -> Duration {
    env::var(var)
        .ok()
        .and_then(|s| {
            s.parse::<u64>().map_err(|e| warn!("🪛️ Invalid configuration value for {var}. {e}")).ok()
        })
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}
