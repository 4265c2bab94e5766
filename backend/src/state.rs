use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{ApiKeyStore, RateLimiter};
use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::identifier::IdentifierProvider;
use crate::imaging::ImageDecoder;
use crate::pipeline::{BatchCoordinator, IdentificationPipeline};

/// Everything the handlers share, built once per process.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<IdentificationPipeline>,
    pub batch: BatchCoordinator,
    pub api_keys: ApiKeyStore,
    pub rate_limiter: Arc<RateLimiter>,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, identifier: Arc<IdentifierProvider>) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ResultCache::new(config.cache.ttl()));
        let decoder = ImageDecoder::new(config.server.allowed_extensions.clone());
        let pipeline = Arc::new(IdentificationPipeline::new(decoder, cache, identifier));
        let batch = BatchCoordinator::new(pipeline.clone(), config.batch.max_files);
        let api_keys = ApiKeyStore::new(config.auth.api_keys.clone());
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        log::info!(
            "Result cache {} (ttl {}s), auth {}, rate limiting {}",
            if config.cache.enabled { "enabled" } else { "disabled" },
            config.cache.ttl_secs,
            if config.auth.enabled { "enabled" } else { "disabled" },
            if config.rate_limit.enabled { "enabled" } else { "disabled" },
        );

        Self {
            config: Arc::new(config),
            pipeline,
            batch,
            api_keys,
            rate_limiter,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
