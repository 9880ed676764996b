use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Malformed data URI: {0}")]
    DataUri(String),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

const DATA_URI_PREFIX: &str = "data:image/";

/// Where an input image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Filesystem path to an encoded image
    Path(PathBuf),
    /// `data:image/<fmt>;base64,<payload>` string
    Base64(String),
    /// Already decoded pixels
    Array(RgbImage),
}

impl ImageSource {
    /// Pick a path or data-URI source for a string argument
    pub fn classify(input: &str) -> Self {
        if input.len() > DATA_URI_PREFIX.len() && input.starts_with(DATA_URI_PREFIX) {
            ImageSource::Base64(input.to_string())
        } else {
            ImageSource::Path(PathBuf::from(input))
        }
    }

    /// Decode the source into an RGB image
    pub fn load(&self) -> Result<RgbImage, ImageError> {
        match self {
            ImageSource::Path(path) => {
                if !path.is_file() {
                    return Err(ImageError::NotFound(path.clone()));
                }
                Ok(image::open(path)?.to_rgb8())
            }
            ImageSource::Base64(uri) => {
                let bytes = decode_data_uri(uri)?;
                Ok(image::load_from_memory(&bytes)?.to_rgb8())
            }
            ImageSource::Array(pixels) => Ok(pixels.clone()),
        }
    }

    /// Short label for log lines
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Base64(uri) => {
                let header = uri.split(',').next().unwrap_or(DATA_URI_PREFIX);
                format!("{},…", header)
            }
            ImageSource::Array(pixels) => format!("<{}x{} array>", pixels.width(), pixels.height()),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(input: &str) -> Self {
        Self::classify(input)
    }
}

impl From<RgbImage> for ImageSource {
    fn from(pixels: RgbImage) -> Self {
        ImageSource::Array(pixels)
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ImageError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| ImageError::DataUri("missing ',' separator".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(ImageError::DataUri(format!(
            "expected a base64 payload, got header {:?}",
            header
        )));
    }
    Ok(STANDARD.decode(payload.trim())?)
}
