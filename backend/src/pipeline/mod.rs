pub mod batch;

pub use batch::{BatchCoordinator, BatchError, BatchItemOutcome, BatchResult};

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{Fingerprint, RankedResult, ResultCache, ResultPayload};
use crate::identifier::IdentifierProvider;
use crate::imaging::{ImageDecoder, ImageError};

/// Raw upload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedImage {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ImageError),
    #[error("Identifier unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Identification(String),
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    identifier_calls: AtomicU64,
    failed_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub identifier_calls: u64,
    pub failed_requests: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            identifier_calls: self.identifier_calls.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// Validates an upload, answers from the result cache when it can, and
/// otherwise asks the identifier and caches what it says.
pub struct IdentificationPipeline {
    decoder: ImageDecoder,
    cache: Option<ResultCache>,
    identifier: Arc<IdentifierProvider>,
    stats: PipelineStats,
}

impl IdentificationPipeline {
    pub fn new(
        decoder: ImageDecoder,
        cache: Option<ResultCache>,
        identifier: Arc<IdentifierProvider>,
    ) -> Self {
        Self {
            decoder,
            cache,
            identifier,
            stats: PipelineStats::default(),
        }
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn identifier(&self) -> &IdentifierProvider {
        &self.identifier
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn process(
        &self,
        upload: &UploadedImage,
        top_k: usize,
        confidence_threshold: Option<f32>,
    ) -> Result<ResultPayload, PipelineError> {
        PipelineStats::bump(&self.stats.total_requests);
        let result = self.run(upload, top_k);
        match result {
            Ok(payload) => Ok(shape(payload, top_k, confidence_threshold)),
            Err(e) => {
                PipelineStats::bump(&self.stats.failed_requests);
                log::warn!("Identification of {} failed: {}", upload.filename, e);
                Err(e)
            }
        }
    }

    fn run(&self, upload: &UploadedImage, top_k: usize) -> Result<ResultPayload, PipelineError> {
        let start = Instant::now();

        // Decode runs even when the bytes are cached so bad input always surfaces.
        let pixels = self
            .decoder
            .validate_and_decode(&upload.filename, &upload.data)?;
        let fingerprint = Fingerprint::of(&upload.data);
        log::debug!(
            "Decoded {} ({}x{}, {})",
            upload.filename,
            pixels.width(),
            pixels.height(),
            fingerprint
        );

        if let Some(cache) = &self.cache {
            if let Some(mut cached) = cache.lookup(&fingerprint) {
                PipelineStats::bump(&self.stats.cache_hits);
                log::debug!("Serving {} from cache ({})", upload.filename, fingerprint);
                if cached.top_k < top_k {
                    log::info!(
                        "Cached result for {} was computed with topk={}, request asked for {}",
                        fingerprint,
                        cached.top_k,
                        top_k
                    );
                }
                cached.from_cache = true;
                return Ok(cached);
            }
            PipelineStats::bump(&self.stats.cache_misses);
        }

        let identifier = self
            .identifier
            .get()
            .map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?;

        PipelineStats::bump(&self.stats.identifier_calls);
        let output = identifier.identify(&pixels, top_k);
        let process_time = start.elapsed();

        if !output.is_success() {
            return Err(PipelineError::Identification(output.message));
        }

        let results = output
            .results
            .into_iter()
            .enumerate()
            .map(|(i, prediction)| RankedResult {
                rank: i + 1,
                localized_name: prediction.localized_name,
                scientific_name: prediction.scientific_name,
                probability: prediction.probability,
            })
            .collect();

        let payload = ResultPayload {
            status: "success".to_string(),
            message: "Identification succeeded".to_string(),
            results,
            top_k,
            process_time,
            created_at: Utc::now(),
            fingerprint,
            from_cache: false,
        };

        if let Some(cache) = &self.cache {
            cache.store(fingerprint, payload.clone());
        }
        log::info!(
            "Identified {} in {:.3}s ({} results)",
            upload.filename,
            process_time.as_secs_f64(),
            payload.results.len()
        );
        Ok(payload)
    }
}

/// Trims the returned copy to `top_k` and drops results under the threshold.
/// Ranks are left as assigned.
fn shape(mut payload: ResultPayload, top_k: usize, confidence_threshold: Option<f32>) -> ResultPayload {
    payload.results.truncate(top_k);
    if let Some(threshold) = confidence_threshold {
        payload.results.retain(|r| r.probability >= threshold);
    }
    payload
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identifier::{Identifier, IdentifierInitError, IdentifierOutput, Prediction};
    use crate::imaging::PixelBuffer;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    pub(crate) fn png_bytes(shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([shade, 128, 64]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Identifier answering from a fixed table and counting its calls.
    pub(crate) struct TableIdentifier {
        pub(crate) calls: AtomicUsize,
        pub(crate) table: Vec<(&'static str, &'static str, f32)>,
        pub(crate) status: i32,
    }

    impl TableIdentifier {
        pub(crate) fn new(table: Vec<(&'static str, &'static str, f32)>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                table,
                status: 0,
            }
        }

        pub(crate) fn failing(status: i32) -> Self {
            Self {
                status,
                ..Self::new(Vec::new())
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Identifier for TableIdentifier {
        fn identify(&self, _image: &PixelBuffer, top_k: usize) -> IdentifierOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.status != 0 {
                return IdentifierOutput::failure(self.status, "model exploded");
            }
            IdentifierOutput::success(
                self.table
                    .iter()
                    .take(top_k)
                    .map(|(local, latin, p)| Prediction {
                        localized_name: local.to_string(),
                        scientific_name: latin.to_string(),
                        probability: *p,
                    })
                    .collect(),
            )
        }
    }

    pub(crate) fn five_plants() -> Vec<(&'static str, &'static str, f32)> {
        vec![
            ("Peace lily", "Spathiphyllum wallisii", 0.62),
            ("Calla lily", "Zantedeschia aethiopica", 0.21),
            // Deliberately out of probability order: ranking is the identifier's.
            ("Anthurium", "Anthurium andraeanum", 0.03),
            ("Moth orchid", "Phalaenopsis aphrodite", 0.09),
            ("Arrowhead", "Sagittaria sagittifolia", 0.01),
        ]
    }

    pub(crate) fn pipeline_with(identifier: Arc<TableIdentifier>) -> IdentificationPipeline {
        IdentificationPipeline::new(
            ImageDecoder::default(),
            Some(ResultCache::new(Duration::from_secs(3600))),
            Arc::new(IdentifierProvider::preloaded(identifier)),
        )
    }

    #[test]
    fn second_identical_upload_comes_from_cache() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier.clone());
        let bytes = png_bytes(10);

        let first = pipeline.process(&UploadedImage::new("a.png", bytes.clone()), 5, None).unwrap();
        let second = pipeline.process(&UploadedImage::new("b.png", bytes), 5, None).unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.results, second.results);
        assert_eq!(identifier.calls(), 1);

        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.identifier_calls, 1);
    }

    #[test]
    fn ranks_follow_identifier_order() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier);

        let payload = pipeline.process(&UploadedImage::new("x.jpg", png_bytes(1)), 5, None).unwrap();
        let ranks: Vec<usize> = payload.results.iter().map(|r| r.rank).collect();
        let names: Vec<&str> = payload.results.iter().map(|r| r.scientific_name.as_str()).collect();

        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            names,
            vec![
                "Spathiphyllum wallisii",
                "Zantedeschia aethiopica",
                "Anthurium andraeanum",
                "Phalaenopsis aphrodite",
                "Sagittaria sagittifolia",
            ]
        );
        assert_eq!(payload.status, "success");
    }

    #[test]
    fn identifier_failure_is_reported_and_not_cached() {
        let identifier = Arc::new(TableIdentifier::failing(3));
        let pipeline = pipeline_with(identifier.clone());

        let err = pipeline
            .process(&UploadedImage::new("x.png", png_bytes(2)), 5, None)
            .unwrap_err();
        match err {
            PipelineError::Identification(message) => assert_eq!(message, "model exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pipeline.cache().unwrap().size(), 0);
        assert_eq!(pipeline.stats().failed_requests, 1);
    }

    #[test]
    fn invalid_input_never_reaches_identifier() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier.clone());

        let bad_ext = pipeline.process(&UploadedImage::new("x.tiff", png_bytes(3)), 5, None);
        assert!(matches!(
            bad_ext,
            Err(PipelineError::InvalidInput(ImageError::UnsupportedFormat(_)))
        ));

        let bad_bytes = pipeline.process(&UploadedImage::new("x.png", b"nope".to_vec()), 5, None);
        assert!(matches!(bad_bytes, Err(PipelineError::InvalidInput(ImageError::Decode(_)))));

        assert_eq!(identifier.calls(), 0);
    }

    #[test]
    fn validation_still_runs_for_cached_bytes() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier);
        let bytes = png_bytes(4);

        pipeline.process(&UploadedImage::new("ok.png", bytes.clone()), 5, None).unwrap();
        let renamed = pipeline.process(&UploadedImage::new("ok.doc", bytes), 5, None);
        assert!(matches!(renamed, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn init_failure_is_unavailable_then_retried() {
        let table = Arc::new(TableIdentifier::new(five_plants()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let (factory_table, factory_attempts) = (table.clone(), attempts.clone());
        let provider = IdentifierProvider::new(Box::new(move || {
            if factory_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IdentifierInitError::Model("cold GPU".into()))
            } else {
                Ok(factory_table.clone() as Arc<dyn Identifier>)
            }
        }));
        let pipeline = IdentificationPipeline::new(
            ImageDecoder::default(),
            Some(ResultCache::new(Duration::from_secs(60))),
            Arc::new(provider),
        );
        let upload = UploadedImage::new("p.png", png_bytes(5));

        assert!(matches!(
            pipeline.process(&upload, 5, None),
            Err(PipelineError::ServiceUnavailable(_))
        ));
        assert!(!pipeline.identifier().is_loaded());
        assert!(pipeline.process(&upload, 5, None).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cached_payload_is_trimmed_to_request() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier.clone());
        let bytes = png_bytes(6);

        let full = pipeline.process(&UploadedImage::new("a.png", bytes.clone()), 5, None).unwrap();
        assert_eq!(full.results.len(), 5);

        let trimmed = pipeline.process(&UploadedImage::new("a.png", bytes.clone()), 2, None).unwrap();
        assert!(trimmed.from_cache);
        assert_eq!(trimmed.results.len(), 2);

        // The stored payload keeps all five.
        let again = pipeline.process(&UploadedImage::new("a.png", bytes), 5, None).unwrap();
        assert_eq!(again.results.len(), 5);
        assert_eq!(identifier.calls(), 1);
    }

    #[test]
    fn cached_payload_records_the_top_k_it_was_built_with() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier.clone());
        let bytes = png_bytes(9);

        let narrow = pipeline.process(&UploadedImage::new("a.png", bytes.clone()), 1, None).unwrap();
        assert_eq!(narrow.top_k, 1);

        let wider = pipeline.process(&UploadedImage::new("a.png", bytes), 3, None).unwrap();
        assert!(wider.from_cache);
        assert_eq!(wider.top_k, 1);
        assert_eq!(wider.results.len(), 1);
        assert_eq!(identifier.calls(), 1);
    }

    #[test]
    fn threshold_drops_low_confidence_results() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = pipeline_with(identifier);

        let payload = pipeline
            .process(&UploadedImage::new("a.png", png_bytes(7)), 5, Some(0.05))
            .unwrap();
        let ranks: Vec<usize> = payload.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 4]);
    }

    #[test]
    fn without_cache_every_call_hits_identifier() {
        let identifier = Arc::new(TableIdentifier::new(five_plants()));
        let pipeline = IdentificationPipeline::new(
            ImageDecoder::default(),
            None,
            Arc::new(IdentifierProvider::preloaded(identifier.clone())),
        );
        let bytes = png_bytes(8);

        for _ in 0..3 {
            let payload = pipeline.process(&UploadedImage::new("a.png", bytes.clone()), 5, None).unwrap();
            assert!(!payload.from_cache);
        }
        assert_eq!(identifier.calls(), 3);
        assert_eq!(pipeline.stats().cache_hits, 0);
    }
}
