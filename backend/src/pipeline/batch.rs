use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::{BatchIdentificationResponse, BatchItem};

use super::{IdentificationPipeline, UploadedImage};
use crate::cache::models::round_secs;
use crate::cache::RankedResult;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Too many files: at most {max} per batch, got {actual}")]
    TooLarge { max: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub enum BatchItemOutcome {
    Identified {
        filename: String,
        top: Option<RankedResult>,
        process_time: Duration,
        from_cache: bool,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl BatchItemOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, BatchItemOutcome::Failed { .. })
    }

    fn into_wire(self) -> BatchItem {
        match self {
            BatchItemOutcome::Identified {
                filename,
                top,
                process_time,
                from_cache,
            } => {
                let (common_name, latin_name, probability) = match top {
                    Some(r) => (Some(r.localized_name), Some(r.scientific_name), Some(r.probability)),
                    None => (None, None, None),
                };
                BatchItem::Identified {
                    filename,
                    common_name,
                    latin_name,
                    probability,
                    process_time: round_secs(process_time),
                    from_cache,
                }
            }
            BatchItemOutcome::Failed { filename, error } => BatchItem::Failed { filename, error },
        }
    }
}

/// One outcome per input, in input order. Timing covers successful items only.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub items: Vec<BatchItemOutcome>,
    pub total_time: Duration,
    pub succeeded: usize,
}

impl BatchResult {
    pub fn average_time(&self) -> Duration {
        if self.succeeded == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.succeeded as u32
        }
    }

    pub fn into_response(self) -> BatchIdentificationResponse {
        let total_time = round_secs(self.total_time);
        let average_time = round_secs(self.average_time());
        let total_files = self.items.len();
        let succeeded = self.succeeded;
        BatchIdentificationResponse {
            status: "success".to_string(),
            message: format!(
                "Batch complete: {} of {} files identified",
                succeeded, total_files
            ),
            results: self.items.into_iter().map(BatchItemOutcome::into_wire).collect(),
            total_files,
            succeeded,
            total_time,
            average_time,
        }
    }
}

const INTERNAL_ITEM_ERROR: &str = "Internal error during identification";

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Runs uploads through the pipeline one after another. A failing item is
/// recorded and the rest carry on.
#[derive(Clone)]
pub struct BatchCoordinator {
    pipeline: Arc<IdentificationPipeline>,
    max_batch_size: usize,
}

impl BatchCoordinator {
    pub fn new(pipeline: Arc<IdentificationPipeline>, max_batch_size: usize) -> Self {
        Self {
            pipeline,
            max_batch_size,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn process_batch(
        &self,
        uploads: &[UploadedImage],
        top_k: usize,
    ) -> Result<BatchResult, BatchError> {
        if uploads.len() > self.max_batch_size {
            return Err(BatchError::TooLarge {
                max: self.max_batch_size,
                actual: uploads.len(),
            });
        }

        let mut items = Vec::with_capacity(uploads.len());
        let mut total_time = Duration::ZERO;
        let mut succeeded = 0;

        for upload in uploads {
            let start = Instant::now();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.process(upload, top_k, None)));
            match outcome {
                Ok(Ok(payload)) => {
                    let elapsed = start.elapsed();
                    total_time += elapsed;
                    succeeded += 1;
                    items.push(BatchItemOutcome::Identified {
                        filename: upload.filename.clone(),
                        top: payload.top().cloned(),
                        process_time: elapsed,
                        from_cache: payload.from_cache,
                    });
                }
                Ok(Err(e)) => items.push(BatchItemOutcome::Failed {
                    filename: upload.filename.clone(),
                    error: e.to_string(),
                }),
                Err(cause) => {
                    log::error!(
                        "Identification of {} panicked: {}",
                        upload.filename,
                        panic_message(&*cause)
                    );
                    items.push(BatchItemOutcome::Failed {
                        filename: upload.filename.clone(),
                        error: INTERNAL_ITEM_ERROR.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Batch of {} processed: {} identified, {} failed",
            uploads.len(),
            succeeded,
            uploads.len() - succeeded
        );
        Ok(BatchResult {
            items,
            total_time,
            succeeded,
        })
    }
}
