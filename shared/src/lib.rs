use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Coarse confidence bucket shown next to each identification result.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_probability(probability: f32) -> Self {
        if probability > 0.8 {
            ConfidenceLevel::High
        } else if probability > 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentificationResult {
    pub rank: usize,
    pub common_name: String,
    pub latin_name: String,
    pub probability: f32,
    pub confidence: ConfidenceLevel,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IdentificationResponse {
    pub status: String,
    pub message: String,
    pub results: Vec<IdentificationResult>,
    /// Seconds, rounded to milliseconds.
    pub process_time: f64,
    pub timestamp: String,
    pub image_hash: String,
    pub from_cache: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum BatchItem {
    Identified {
        filename: String,
        common_name: Option<String>,
        latin_name: Option<String>,
        probability: Option<f32>,
        process_time: f64,
        from_cache: bool,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl BatchItem {
    pub fn filename(&self) -> &str {
        match self {
            BatchItem::Identified { filename, .. } | BatchItem::Failed { filename, .. } => filename,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BatchItem::Failed { .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchIdentificationResponse {
    pub status: String,
    pub message: String,
    pub results: Vec<BatchItem>,
    pub total_files: usize,
    pub succeeded: usize,
    pub total_time: f64,
    pub average_time: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
    pub uptime: f64,
    pub model_loaded: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatsResponse {
    pub cache_enabled: bool,
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_requests: u64,
    pub identifier_calls: u64,
    pub failed_requests: u64,
    pub model_loaded: bool,
    pub uptime: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CacheClearedResponse {
    pub message: String,
    pub removed: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub health: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub timestamp: String,
}
