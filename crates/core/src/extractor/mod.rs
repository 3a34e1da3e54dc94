pub mod raster;
pub mod pdf;
pub mod tabular;
pub mod text;

pub use raster::{ocr_engine_from_settings, HttpOcr, ImageExtractor, OcrEngine, TesseractCli};
pub use pdf::PdfExtractor;
pub use tabular::TabularExtractor;
pub use text::decode_text;

use crate::config::ProcessingSettings;
use crate::error::IngestError;
use crate::models::{ExtractionResult, FileType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;

/// Synchronous, CPU-bound extraction over an in-memory document.
pub trait Extract {
    /// Implementations poll `deadline` between units of work (rows, pages) and
    /// stop with `IngestError::Timeout` once it has passed.
    fn extract_until(&self, bytes: &[u8], deadline: Deadline) -> Result<ExtractionResult, IngestError>;

    fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult, IngestError> {
        self.extract_until(bytes, Deadline::unbounded())
    }
}

/// Point in time after which blocking extraction gives up. Dropping the
/// awaiting future cannot stop a blocking task, so the task checks this itself.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            at: None,
            budget: Duration::MAX,
        }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), IngestError> {
        if self.expired() {
            Err(IngestError::Timeout(self.budget.as_secs()))
        } else {
            Ok(())
        }
    }
}

/// Dispatches a document to the extractor for its type and bounds the call
/// with a per-document timeout.
#[derive(Clone)]
pub struct FormatExtractor {
    tabular: TabularExtractor,
    pdf: PdfExtractor,
    image: ImageExtractor,
    timeout: Duration,
}

impl FormatExtractor {
    pub fn new(
        tabular: TabularExtractor,
        pdf: PdfExtractor,
        image: ImageExtractor,
        timeout: Duration,
    ) -> Self {
        Self {
            tabular,
            pdf,
            image,
            timeout,
        }
    }

    pub fn from_settings(settings: &ProcessingSettings) -> Result<Self, IngestError> {
        let engine = ocr_engine_from_settings(&settings.ocr)?;
        Ok(Self::new(
            TabularExtractor::new(settings.csv.max_rows),
            PdfExtractor::new(settings.pdf.max_pages),
            ImageExtractor::new(engine, settings.ocr.language.clone()),
            settings.extraction_timeout(),
        ))
    }

    pub async fn extract(
        &self,
        file_type: FileType,
        bytes: Arc<[u8]>,
    ) -> Result<ExtractionResult, IngestError> {
        self.extract_in_slot(file_type, bytes, None).await
    }

    /// Like `extract`, but `slot` is released only when the work itself ends.
    /// Blocking work that outlives a timed-out caller keeps holding it until
    /// it notices the deadline.
    pub async fn extract_in_slot(
        &self,
        file_type: FileType,
        bytes: Arc<[u8]>,
        slot: Option<OwnedSemaphorePermit>,
    ) -> Result<ExtractionResult, IngestError> {
        let deadline = Deadline::after(self.timeout);
        let work = async move {
            match file_type {
                FileType::Txt => Ok(decode_text(&bytes)),
                FileType::Csv => run_blocking(self.tabular, bytes, deadline, slot).await,
                FileType::Pdf => run_blocking(self.pdf, bytes, deadline, slot).await,
                // Dropping the OCR future kills the engine's work with it.
                FileType::Png => {
                    let result = self.image.extract(bytes).await;
                    drop(slot);
                    result
                }
            }
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| IngestError::Timeout(self.timeout.as_secs()))?
    }
}

async fn run_blocking<E>(
    extractor: E,
    bytes: Arc<[u8]>,
    deadline: Deadline,
    slot: Option<OwnedSemaphorePermit>,
) -> Result<ExtractionResult, IngestError>
where
    E: Extract + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _slot = slot;
        deadline.check()?;
        extractor.extract_until(&bytes, deadline)
    })
    .await
    .map_err(|error| IngestError::Task(error.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionStatus;
    use async_trait::async_trait;

    struct SlowOcr;

    #[async_trait]
    impl OcrEngine for SlowOcr {
        async fn recognize(&self, _image: &[u8]) -> Result<String, IngestError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn extractor_with(engine: Arc<dyn OcrEngine>, timeout: Duration) -> FormatExtractor {
        FormatExtractor::new(
            TabularExtractor::new(100),
            PdfExtractor::new(10),
            ImageExtractor::new(engine, "eng".to_string()),
            timeout,
        )
    }

    #[tokio::test]
    async fn dispatches_text_and_csv() {
        let extractor = extractor_with(Arc::new(SlowOcr), Duration::from_secs(5));

        let text = extractor
            .extract(FileType::Txt, Arc::from(&b"plain words"[..]))
            .await
            .expect("text never fails");
        assert_eq!(text.text, "plain words");
        assert_eq!(text.status, ExtractionStatus::Complete);

        let table = extractor
            .extract(FileType::Csv, Arc::from(&b"name,city\nada,london\n"[..]))
            .await
            .expect("csv should parse");
        assert!(table.text.contains("city: london"));
    }

    #[tokio::test]
    async fn timeout_is_an_extraction_failure() {
        let extractor = extractor_with(Arc::new(SlowOcr), Duration::from_millis(50));
        let png = raster::tests::tiny_png(4, 3);

        let result = extractor.extract(FileType::Png, Arc::from(png)).await;
        assert!(matches!(result, Err(IngestError::Timeout(_))));
    }

    fn wide_csv(rows: usize) -> Arc<[u8]> {
        let mut csv = String::from("id,label,amount\n");
        for row in 0..rows {
            csv.push_str(&format!("{row},item-{row},{}\n", row * 3));
        }
        Arc::from(csv.into_bytes())
    }

    #[test]
    fn timed_out_parse_releases_its_blocking_thread_and_slot() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .expect("runtime should build");

        runtime.block_on(async {
            let impatient = FormatExtractor::new(
                TabularExtractor::new(usize::MAX),
                PdfExtractor::new(10),
                ImageExtractor::new(Arc::new(SlowOcr), "eng".to_string()),
                Duration::from_millis(5),
            );
            let patient = extractor_with(Arc::new(SlowOcr), Duration::from_secs(2));
            let slots = Arc::new(tokio::sync::Semaphore::new(1));

            let permit = Arc::clone(&slots)
                .acquire_owned()
                .await
                .expect("semaphore open");
            let abandoned = impatient
                .extract_in_slot(FileType::Csv, wide_csv(1_000_000), Some(permit))
                .await;
            assert!(matches!(abandoned, Err(IngestError::Timeout(_))));

            let reacquired =
                tokio::time::timeout(Duration::from_secs(1), Arc::clone(&slots).acquire_owned()).await;
            assert!(reacquired.is_ok(), "slot still held by the abandoned parse");

            let small = patient
                .extract(FileType::Csv, Arc::from(&b"name,city\nada,london\n"[..]))
                .await
                .expect("blocking thread is free again");
            assert!(small.text.contains("name: ada"));
        });
    }

    #[test]
    fn deadline_reports_its_budget() {
        assert!(Deadline::unbounded().check().is_ok());
        let passed = Deadline::after(Duration::ZERO);
        assert!(passed.expired());
        assert!(matches!(passed.check(), Err(IngestError::Timeout(0))));
    }
}
