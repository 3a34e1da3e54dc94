use crate::config::{OcrEngineKind, OcrSettings};
use crate::error::IngestError;
use crate::models::{ExtractionResult, Metadata};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::GenericImageView;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, IngestError>;
}

pub fn ocr_engine_from_settings(settings: &OcrSettings) -> Result<Arc<dyn OcrEngine>, IngestError> {
    match settings.engine {
        OcrEngineKind::Tesseract => Ok(Arc::new(TesseractCli::new(
            settings.binary.clone(),
            settings.language.clone(),
            settings.dpi,
        ))),
        OcrEngineKind::Http => {
            let endpoint = settings
                .endpoint
                .as_ref()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| IngestError::OcrFailed("no OCR endpoint configured".to_string()))?;
            Ok(Arc::new(HttpOcr::new(
                endpoint,
                settings.api_key.clone(),
                settings.language.clone(),
            )))
        }
    }
}

/// Runs the `tesseract` executable, piping the image through stdin/stdout.
/// The child is killed if the extraction future is dropped on timeout.
pub struct TesseractCli {
    binary: String,
    language: String,
    dpi: u32,
}

impl TesseractCli {
    pub fn new(binary: String, language: String, dpi: u32) -> Self {
        Self {
            binary,
            language,
            dpi,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, image: &[u8]) -> Result<String, IngestError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "--psm", "6"])
            .arg("--dpi")
            .arg(self.dpi.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                IngestError::OcrFailed(format!("cannot start {}: {error}", self.binary))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| IngestError::OcrFailed("tesseract stdin unavailable".to_string()))?;
        let payload = image.to_vec();
        let feed = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };

        let (_, output) = tokio::try_join!(feed, child.wait_with_output())?;
        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest<'a> {
    image_base64: String,
    language: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Posts the image to a recognition service that answers with `{"text": ...}`
/// or `{"pages": [{"text": ...}]}`.
pub struct HttpOcr {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    language: String,
}

impl HttpOcr {
    pub fn new(endpoint: String, api_key: Option<String>, language: String) -> Self {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            language,
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, IngestError> {
        let payload = OcrRequest {
            image_base64: STANDARD.encode(image),
            language: &self.language,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json().await?;
        payload_to_text(&payload)
    }
}

fn payload_to_text(payload: &OcrResponse) -> Result<String, IngestError> {
    if let Some(pages) = &payload.pages {
        let joined = pages
            .iter()
            .filter_map(|page| page.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            return Ok(joined);
        }
    }

    match &payload.text {
        Some(text) => Ok(text.trim().to_string()),
        None => Err(IngestError::OcrFailed(
            "OCR response carried neither pages nor text".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct ImageExtractor {
    engine: Arc<dyn OcrEngine>,
    language: String,
}

impl ImageExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, language: String) -> Self {
        Self { engine, language }
    }

    pub async fn extract(&self, bytes: Arc<[u8]>) -> Result<ExtractionResult, IngestError> {
        let decode_input = bytes.clone();
        let (width, height) = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&decode_input).map(|decoded| decoded.dimensions())
        })
        .await
        .map_err(|error| IngestError::Task(error.to_string()))??;

        let text = self.engine.recognize(&bytes).await?.trim().to_string();

        let mut metadata = Metadata::new();
        metadata.insert(
            "image_dimensions".to_string(),
            json!({ "width": width, "height": height }),
        );
        metadata.insert("ocr_language".to_string(), json!(self.language));

        if text.is_empty() {
            Ok(ExtractionResult::degraded(text, metadata))
        } else {
            Ok(ExtractionResult::complete(text, metadata))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ExtractionStatus;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    pub(crate) fn tiny_png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| {
                if (x + y) % 2 == 0 {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                }
            });
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("png should encode");
        bytes
    }

    pub(crate) struct FixedOcr(pub &'static str);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize(&self, _image: &[u8]) -> Result<String, IngestError> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl OcrEngine for BrokenOcr {
        async fn recognize(&self, _image: &[u8]) -> Result<String, IngestError> {
            Err(IngestError::OcrFailed("engine crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn records_dimensions_and_text() {
        let extractor = ImageExtractor::new(Arc::new(FixedOcr(" INVOICE 42 \n")), "eng".into());
        let result = extractor
            .extract(Arc::from(tiny_png(7, 5)))
            .await
            .expect("image should be recognised");

        assert_eq!(result.text, "INVOICE 42");
        assert_eq!(result.metadata["image_dimensions"]["width"], 7);
        assert_eq!(result.metadata["image_dimensions"]["height"], 5);
        assert_eq!(result.status, ExtractionStatus::Complete);
    }

    #[tokio::test]
    async fn corrupt_image_is_an_extraction_failure() {
        let extractor = ImageExtractor::new(Arc::new(FixedOcr("never")), "eng".into());
        let result = extractor
            .extract(Arc::from(&b"\x89PNG\r\n\x1a\nnot really"[..]))
            .await;
        assert!(matches!(result, Err(IngestError::Image(_))));
    }

    #[tokio::test]
    async fn engine_failure_is_an_extraction_failure() {
        let extractor = ImageExtractor::new(Arc::new(BrokenOcr), "eng".into());
        let result = extractor.extract(Arc::from(tiny_png(2, 2))).await;
        assert!(matches!(result, Err(IngestError::OcrFailed(_))));
    }

    #[test]
    fn ocr_pages_are_joined_skipping_blank_ones() {
        let response = OcrResponse {
            pages: Some(vec![
                OcrPage {
                    text: Some("  ".to_string()),
                },
                OcrPage {
                    text: Some("Total due".to_string()),
                },
            ]),
            text: None,
        };
        assert_eq!(payload_to_text(&response).expect("pages present"), "Total due");
    }

    #[test]
    fn ocr_falls_back_to_flat_text() {
        let response = OcrResponse {
            pages: Some(Vec::new()),
            text: Some("Receipt\n".to_string()),
        };
        assert_eq!(payload_to_text(&response).expect("text present"), "Receipt");

        let empty = OcrResponse {
            pages: None,
            text: None,
        };
        assert!(payload_to_text(&empty).is_err());
    }

    #[test]
    fn http_engine_requires_endpoint() {
        let settings = OcrSettings {
            engine: OcrEngineKind::Http,
            endpoint: Some("   ".to_string()),
            ..OcrSettings::default()
        };
        assert!(ocr_engine_from_settings(&settings).is_err());
    }
}
