//! The opaque classification model and its lazy, process-wide handle.

pub mod provider;
#[cfg(feature = "torch")]
pub mod torch;

pub use provider::{IdentifierFactory, IdentifierProvider};

use crate::imaging::PixelBuffer;

/// Status code an identifier reports on success.
pub const STATUS_OK: i32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub localized_name: String,
    pub scientific_name: String,
    pub probability: f32,
}

/// Raw answer of an identifier: best match first, in the identifier's order.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierOutput {
    pub status: i32,
    pub message: String,
    pub results: Vec<Prediction>,
}

impl IdentifierOutput {
    pub fn success(results: Vec<Prediction>) -> Self {
        Self {
            status: STATUS_OK,
            message: "OK".to_string(),
            results,
        }
    }

    pub fn failure(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            results: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

pub trait Identifier: Send + Sync {
    fn identify(&self, image: &PixelBuffer, top_k: usize) -> IdentifierOutput;
}

#[derive(Debug, thiserror::Error)]
pub enum IdentifierInitError {
    #[error("Model file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model load error: {0}")]
    Model(String),
    #[error("Invalid labels file: {0}")]
    Labels(String),
    #[error("No identifier backend available: {0}")]
    Unavailable(String),
}
