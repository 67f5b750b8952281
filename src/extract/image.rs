//! Image extraction: validation only.
//!
//! One image becomes one multimodal embedding downstream; there is nothing to
//! chunk. Extraction just confirms the bytes actually look like an image so a
//! renamed binary fails fast instead of reaching the embedding service.

use async_trait::async_trait;

use crate::fetch::FetchedSource;
use crate::sniff;
use crate::types::ContentType;

use super::{Extraction, ExtractError, Extractor};

#[derive(Clone, Copy, Debug, Default)]
pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for ImageExtractor {
    async fn extract(&self, source: &FetchedSource) -> Result<Extraction, ExtractError> {
        match sniff::from_magic_bytes(&source.bytes) {
            Some(ContentType::Image) => Ok(Extraction::Image {
                bytes: source.bytes.clone(),
            }),
            _ => Err(ExtractError::Malformed {
                reason: "bytes do not match any supported image format".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_png_passes_through() {
        let extractor = ImageExtractor::new();
        let source =
            FetchedSource::from_bytes("chart.png", b"\x89PNG\r\n\x1a\n payload".to_vec());
        let Extraction::Image { bytes } = extractor.extract(&source).await.unwrap() else {
            panic!("image extraction yields image bytes");
        };
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn non_image_bytes_are_malformed() {
        let extractor = ImageExtractor::new();
        let source = FetchedSource::from_bytes("fake.png", b"plain text".to_vec());
        assert!(matches!(
            extractor.extract(&source).await,
            Err(ExtractError::Malformed { .. })
        ));
    }
}
