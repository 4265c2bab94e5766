use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array3;
use std::path::Path;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("Unable to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decoded RGB pixels of an upload.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resizes to `size`x`size` and lays the pixels out channel-first, scaled
    /// to [0, 1] and normalized per channel with `mean`/`std`.
    pub fn to_normalized_chw(&self, size: u32, mean: [f32; 3], std: [f32; 3]) -> Array3<f32> {
        let resized = image::imageops::resize(&self.image, size, size, FilterType::Triangle);
        let side = size as usize;
        Array3::from_shape_fn((3, side, side), |(c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - mean[c]) / std[c]
        })
    }
}

/// Validates upload filenames and decodes upload bytes.
///
/// The extension check and the byte decode are independent gates: a PNG named
/// `leaf.txt` is rejected, and so is garbage named `leaf.png`.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    allowed_extensions: Vec<String>,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(ALLOWED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect())
    }
}

impl ImageDecoder {
    pub fn new(allowed_extensions: Vec<String>) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn validate_extension(&self, filename: &str) -> Result<(), ImageError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension {
            Some(ext) if self.allowed_extensions.iter().any(|allowed| *allowed == ext) => Ok(()),
            _ => Err(ImageError::UnsupportedFormat(filename.to_string())),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<PixelBuffer, ImageError> {
        let image = image::load_from_memory(data)?;
        Ok(PixelBuffer::new(image.to_rgb8()))
    }

    /// Runs both gates, extension first.
    pub fn validate_and_decode(&self, filename: &str, data: &[u8]) -> Result<PixelBuffer, ImageError> {
        self.validate_extension(filename)?;
        self.decode(data)
    }
}
