pub mod decoder;

pub use decoder::{ImageDecoder, ImageError, PixelBuffer, ALLOWED_EXTENSIONS};
