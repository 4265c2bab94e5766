#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::web;
use backend::config::AppConfig;
use backend::identifier::{
    Identifier, IdentifierInitError, IdentifierOutput, IdentifierProvider, Prediction,
};
use backend::imaging::PixelBuffer;
use backend::AppState;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

pub const BOUNDARY: &str = "plantid-test-boundary";
pub const DEMO_KEY: &str = "Bearer demo_key";

/// Answers every image with the same three plants and counts its calls.
#[derive(Default)]
pub struct StubIdentifier {
    calls: AtomicUsize,
}

impl StubIdentifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Identifier for StubIdentifier {
    fn identify(&self, _image: &PixelBuffer, top_k: usize) -> IdentifierOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let table = [
            ("Monstera", "Monstera deliciosa", 0.91),
            ("Split-leaf philodendron", "Thaumatophyllum bipinnatifidum", 0.06),
            ("Pothos", "Epipremnum aureum", 0.02),
        ];
        IdentifierOutput::success(
            table
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

pub fn state_with(config: AppConfig) -> (web::Data<AppState>, Arc<StubIdentifier>) {
    let identifier = Arc::new(StubIdentifier::default());
    let provider = IdentifierProvider::preloaded(identifier.clone());
    (web::Data::new(AppState::new(config, Arc::new(provider))), identifier)
}

pub fn unavailable_state(config: AppConfig) -> web::Data<AppState> {
    let provider = IdentifierProvider::new(Box::new(
        || -> Result<Arc<dyn Identifier>, IdentifierInitError> {
            Err(IdentifierInitError::Unavailable("no weights on disk".into()))
        },
    ));
    web::Data::new(AppState::new(config, Arc::new(provider)))
}

pub fn png_bytes(shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([shade, 200, 40]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Builds a `multipart/form-data` body from `(field, filename, bytes)` parts.
pub fn multipart(parts: &[(&str, &str, Vec<u8>)]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}
