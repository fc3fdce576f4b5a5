//! Local thumbnail generation for the front-end's gallery preview.

use crate::events::EventSink;
use crate::protocol::{JobRequest, OutputEvent};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::Cursor;
use thiserror::Error;

const DEFAULT_WIDTH: u32 = 100;
const JPEG_QUALITY: u8 = 70;

#[derive(Debug, Error)]
pub enum ThumbError {
    #[error("File not found")]
    NotFound,
    #[error("Decode failed")]
    Decode,
    #[error("Encode failed")]
    Encode,
}

/// Decodes, resizes to `width` preserving aspect ratio, re-encodes as JPEG.
pub fn build_thumbnail(path: &str, width: u32) -> Result<Vec<u8>, ThumbError> {
    let reader = image::ImageReader::open(path).map_err(|_| ThumbError::NotFound)?;
    let img = reader
        .with_guessed_format()
        .map_err(|_| ThumbError::Decode)?
        .decode()
        .map_err(|_| ThumbError::Decode)?;

    let (w, h) = (img.width().max(1), img.height().max(1));
    let height = ((width as f64) * (h as f64) / (w as f64)).round().max(1.0) as u32;
    let thumb = img.resize_exact(width, height, FilterType::Lanczos3);

    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY);
    thumb
        .write_with_encoder(encoder)
        .map_err(|_| ThumbError::Encode)?;
    Ok(buf)
}

/// Handles a `generate_thumb` job: emits one `data` event with the
/// Base64-encoded JPEG, or an `error` event.
pub fn generate(sink: &EventSink, job: &JobRequest) {
    let width = job
        .config
        .get("width")
        .and_then(|w| w.parse::<u32>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_WIDTH);

    let Some(path) = job.files.first() else {
        sink.emit(&OutputEvent::error("No file provided"));
        return;
    };

    match build_thumbnail(path, width) {
        Ok(bytes) => {
            sink.emit(
                &OutputEvent::data(serde_json::Value::String(STANDARD.encode(bytes)))
                    .with_file(path.clone()),
            );
        }
        Err(err) => sink.emit(&OutputEvent::error(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCapture;
    use image::RgbImage;
    use std::collections::HashMap;

    fn write_test_png(width: u32, height: u32) -> tempfile::NamedTempFile {
        let tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(tmp.path()).unwrap();
        tmp
    }

    fn thumb_job(path: &str, width: Option<&str>) -> JobRequest {
        let mut config = HashMap::new();
        if let Some(w) = width {
            config.insert("width".to_string(), w.to_string());
        }
        JobRequest {
            action: "generate_thumb".to_string(),
            service: String::new(),
            files: vec![path.to_string()],
            creds: HashMap::new(),
            config,
            context_data: HashMap::new(),
            http_spec: None,
            rate_limits: None,
            retry_config: None,
        }
    }

    #[test]
    fn resizes_to_requested_width() {
        let tmp = write_test_png(400, 200);
        let bytes = build_thumbnail(&tmp.path().to_string_lossy(), 120).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!(thumb.width(), 120);
        assert_eq!(thumb.height(), 60);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = build_thumbnail("/no/such/image.png", 100).unwrap_err();
        assert!(matches!(err, ThumbError::NotFound));
    }

    #[test]
    fn garbage_input_fails_decode() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"this is not an image at all").unwrap();
        let err = build_thumbnail(&tmp.path().to_string_lossy(), 100).unwrap_err();
        assert!(matches!(err, ThumbError::Decode));
    }

    #[test]
    fn generate_emits_base64_data_event() {
        let tmp = write_test_png(50, 50);
        let capture = EventCapture::new();
        let sink = capture.sink();
        generate(&sink, &thumb_job(&tmp.path().to_string_lossy(), None));

        let events = capture.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "data");
        assert_eq!(events[0]["status"], "success");
        let encoded = events[0]["data"].as_str().unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        // Default width applies when the job does not specify one.
        assert_eq!(thumb.width(), 100);
    }

    #[test]
    fn generate_reports_decode_errors() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"nope").unwrap();
        let capture = EventCapture::new();
        let sink = capture.sink();
        generate(&sink, &thumb_job(&tmp.path().to_string_lossy(), Some("64")));

        let events = capture.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[0]["msg"], "Decode failed");
    }

    #[test]
    fn bad_width_falls_back_to_default() {
        let tmp = write_test_png(300, 300);
        let capture = EventCapture::new();
        let sink = capture.sink();
        generate(&sink, &thumb_job(&tmp.path().to_string_lossy(), Some("zero")));
        let events = capture.events();
        let bytes = STANDARD.decode(events[0]["data"].as_str().unwrap()).unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().width(), 100);
    }
}
