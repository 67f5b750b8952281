//! Content-type inference from file content.
//!
//! Magic bytes come first; the file extension is a fallback only. Renamed or
//! re-encoded files routinely lie about their extension, so trusting it
//! before the bytes is a known misclassification source.

use mime_guess::mime;

use crate::types::ContentType;

/// Infer the content type of `bytes`, consulting `filename` only when the
/// bytes match no known signature and are not valid UTF-8 text.
pub fn detect(bytes: &[u8], filename: Option<&str>) -> Option<ContentType> {
    if let Some(found) = from_magic_bytes(bytes) {
        return Some(found);
    }
    if let Some(found) = filename.and_then(from_extension) {
        return Some(found);
    }
    if std::str::from_utf8(bytes).is_ok() && !bytes.is_empty() {
        return Some(ContentType::Document);
    }
    None
}

/// Signature table for the supported container formats.
pub fn from_magic_bytes(bytes: &[u8]) -> Option<ContentType> {
    if bytes.starts_with(b"%PDF") {
        return Some(ContentType::Document);
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(b"\xff\xd8\xff")
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
    {
        return Some(ContentType::Image);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" {
        return match &bytes[8..12] {
            b"WEBP" => Some(ContentType::Image),
            b"WAVE" => Some(ContentType::Audio),
            b"AVI " => Some(ContentType::Video),
            _ => None,
        };
    }
    // ISO base media container: "ftyp" at offset 4.
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some(ContentType::Video);
    }
    // Matroska/WebM EBML header.
    if bytes.starts_with(b"\x1a\x45\xdf\xa3") {
        return Some(ContentType::Video);
    }
    if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] & 0xe0 == 0xe0)
    {
        return Some(ContentType::Audio);
    }
    if bytes.starts_with(b"OggS") || bytes.starts_with(b"fLaC") {
        return Some(ContentType::Audio);
    }
    None
}

/// Extension-based fallback via the mime registry.
pub fn from_extension(filename: &str) -> Option<ContentType> {
    let guess = mime_guess::from_path(filename).first()?;
    match guess.type_() {
        mime::IMAGE => Some(ContentType::Image),
        mime::VIDEO => Some(ContentType::Video),
        mime::AUDIO => Some(ContentType::Audio),
        mime::TEXT => Some(ContentType::Document),
        mime::APPLICATION => {
            let sub = guess.subtype().as_str();
            matches!(sub, "pdf" | "json" | "xml" | "msword").then_some(ContentType::Document)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_beat_misleading_extensions() {
        // A PNG renamed to .txt is still an image.
        let png = b"\x89PNG\r\n\x1a\n rest of file".to_vec();
        assert_eq!(detect(&png, Some("notes.txt")), Some(ContentType::Image));

        let pdf = b"%PDF-1.7 ...".to_vec();
        assert_eq!(detect(&pdf, Some("clip.mp4")), Some(ContentType::Document));
    }

    #[test]
    fn riff_containers_split_by_subtype() {
        let mut wav = b"RIFF\x24\x00\x00\x00WAVE".to_vec();
        wav.extend_from_slice(&[0u8; 8]);
        assert_eq!(from_magic_bytes(&wav), Some(ContentType::Audio));

        let mut webp = b"RIFF\x24\x00\x00\x00WEBP".to_vec();
        webp.extend_from_slice(&[0u8; 8]);
        assert_eq!(from_magic_bytes(&webp), Some(ContentType::Image));
    }

    #[test]
    fn iso_media_and_matroska_are_video() {
        let mp4 = b"\x00\x00\x00\x20ftypisom....".to_vec();
        assert_eq!(from_magic_bytes(&mp4), Some(ContentType::Video));
        let mkv = b"\x1a\x45\xdf\xa3 more".to_vec();
        assert_eq!(from_magic_bytes(&mkv), Some(ContentType::Video));
    }

    #[test]
    fn plain_utf8_defaults_to_document() {
        assert_eq!(
            detect(b"just some prose, no container", None),
            Some(ContentType::Document)
        );
    }

    #[test]
    fn unknown_binary_without_extension_is_none() {
        assert_eq!(detect(&[0x00, 0x01, 0x02, 0xfe], None), None);
        assert!(detect(&[], None).is_none());
    }

    #[test]
    fn extension_fallback_covers_common_types() {
        assert_eq!(from_extension("talk.mp3"), Some(ContentType::Audio));
        assert_eq!(from_extension("demo.webm"), Some(ContentType::Video));
        assert_eq!(from_extension("chart.png"), Some(ContentType::Image));
        assert_eq!(from_extension("readme.md"), Some(ContentType::Document));
        assert_eq!(from_extension("blob.bin"), None);
    }
}
