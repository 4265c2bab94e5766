use chrono::{DateTime, Utc};
use shared::{ConfidenceLevel, IdentificationResponse, IdentificationResult};
use std::time::{Duration, Instant};

use super::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub rank: usize,
    pub localized_name: String,
    pub scientific_name: String,
    pub probability: f32,
}

/// Outcome of one identification, shared between the cache and responses.
///
/// The cache only ever hands out clones, so flipping `from_cache` on a
/// returned payload leaves the stored original untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    pub status: String,
    pub message: String,
    pub results: Vec<RankedResult>,
    /// How many results the identifier was asked for when this was computed.
    pub top_k: usize,
    pub process_time: Duration,
    pub created_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub from_cache: bool,
}

impl ResultPayload {
    pub fn top(&self) -> Option<&RankedResult> {
        self.results.first()
    }

    pub fn to_response(&self) -> IdentificationResponse {
        IdentificationResponse {
            status: self.status.clone(),
            message: self.message.clone(),
            results: self
                .results
                .iter()
                .map(|r| IdentificationResult {
                    rank: r.rank,
                    common_name: r.localized_name.clone(),
                    latin_name: r.scientific_name.clone(),
                    probability: r.probability,
                    confidence: ConfidenceLevel::from_probability(r.probability),
                })
                .collect(),
            process_time: round_secs(self.process_time),
            timestamp: self.created_at.to_rfc3339(),
            image_hash: self.fingerprint.to_hex(),
            from_cache: self.from_cache,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: ResultPayload,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, payload: ResultPayload, inserted_at: Instant) -> Self {
        Self {
            fingerprint,
            payload,
            inserted_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }
}

/// Seconds with millisecond precision, as reported on the wire.
pub fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}
