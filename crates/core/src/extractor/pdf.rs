use super::{Deadline, Extract};
use crate::error::IngestError;
use crate::models::{ExtractionResult, Metadata};
use lopdf::Document;
use serde_json::{json, Value};
use std::panic::catch_unwind;
use tracing::debug;

#[derive(Debug, Clone)]
struct ExtractedPages {
    page_count: usize,
    /// Text of each readable page, in page order.
    pages: Vec<String>,
    /// Pages within the cap that could not be read, with the cause.
    failed: Vec<(u32, String)>,
}

impl ExtractedPages {
    fn has_text(&self) -> bool {
        self.pages.iter().any(|page| !page.trim().is_empty())
    }
}

type Attempt = fn(&[u8], usize, Deadline) -> Result<ExtractedPages, String>;

/// Tried in order; the first attempt that reads every page wins. An attempt
/// that loses pages is kept as a fallback if no later attempt does better.
const ATTEMPTS: [(&str, Attempt); 2] = [
    ("lopdf", extract_with_lopdf),
    ("pdf-extract", extract_with_pdf_extract),
];

#[derive(Debug, Clone, Copy)]
pub struct PdfExtractor {
    max_pages: usize,
}

impl PdfExtractor {
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }
}

impl Extract for PdfExtractor {
    fn extract_until(&self, bytes: &[u8], deadline: Deadline) -> Result<ExtractionResult, IngestError> {
        let mut failures = Vec::new();
        let mut partial: Option<(&str, ExtractedPages)> = None;

        for (name, attempt) in ATTEMPTS {
            deadline.check()?;
            let outcome = catch_unwind(|| attempt(bytes, self.max_pages, deadline))
                .unwrap_or_else(|_| Err("parser panicked".to_string()));

            match outcome {
                Ok(extracted) if !extracted.has_text() => {
                    let unreadable = describe_failed(&extracted.failed);
                    failures.push(format!("{name}: no readable page text{unreadable}"));
                }
                Ok(extracted) if extracted.failed.is_empty() => {
                    return Ok(self.finish(name, extracted, &failures));
                }
                Ok(extracted) => {
                    failures.push(format!("{name}:{}", describe_failed(&extracted.failed)));
                    partial.get_or_insert((name, extracted));
                }
                Err(cause) => failures.push(format!("{name}: {cause}")),
            }
            debug!(extractor = name, "pdf extraction attempt incomplete, trying next");
        }
        deadline.check()?;

        match partial {
            Some((name, extracted)) => Ok(self.finish(name, extracted, &failures)),
            None => Err(IngestError::PdfParse(failures.join("; "))),
        }
    }
}

impl PdfExtractor {
    fn finish(&self, method: &str, extracted: ExtractedPages, failures: &[String]) -> ExtractionResult {
        let text = extracted
            .pages
            .iter()
            .map(|page| page.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut metadata = Metadata::new();
        metadata.insert("page_count".to_string(), Value::from(extracted.page_count));
        metadata.insert(
            "pages_processed".to_string(),
            Value::from(extracted.pages.len() + extracted.failed.len()),
        );
        metadata.insert("pdf_extractor".to_string(), Value::from(method));
        if !extracted.failed.is_empty() {
            let failed: Vec<Value> = extracted
                .failed
                .iter()
                .map(|(page, cause)| json!({ "page": page, "error": cause }))
                .collect();
            metadata.insert("pages_failed".to_string(), Value::from(failed));
        }
        if !failures.is_empty() {
            metadata.insert("pdf_attempt_failures".to_string(), Value::from(failures.to_vec()));
        }

        if extracted.page_count > self.max_pages || !extracted.failed.is_empty() {
            ExtractionResult::degraded(text, metadata)
        } else {
            ExtractionResult::complete(text, metadata)
        }
    }
}

fn describe_failed(failed: &[(u32, String)]) -> String {
    failed
        .iter()
        .map(|(page, cause)| format!(" page {page} unreadable ({cause})"))
        .collect::<Vec<_>>()
        .join(",")
}

fn extract_with_lopdf(bytes: &[u8], max_pages: usize, deadline: Deadline) -> Result<ExtractedPages, String> {
    let document = Document::load_mem(bytes).map_err(|error| error.to_string())?;
    let page_numbers = document.get_pages();

    let mut pages = Vec::new();
    let mut failed = Vec::new();
    for page_no in page_numbers.keys().copied().take(max_pages) {
        if deadline.expired() {
            return Err("deadline passed".to_string());
        }
        match document.extract_text(&[page_no]) {
            Ok(text) => pages.push(text),
            Err(error) => {
                debug!(page = page_no, %error, "lopdf could not read page");
                failed.push((page_no, error.to_string()));
            }
        }
    }

    Ok(ExtractedPages {
        page_count: page_numbers.len(),
        pages,
        failed,
    })
}

/// pdf-extract reads the whole document in one call; the deadline is only
/// checked before it starts.
fn extract_with_pdf_extract(bytes: &[u8], max_pages: usize, _deadline: Deadline) -> Result<ExtractedPages, String> {
    let all_pages =
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|error| error.to_string())?;
    let page_count = all_pages.len();

    let pages = all_pages.into_iter().take(max_pages).collect();

    Ok(ExtractedPages {
        page_count,
        pages,
        failed: Vec::new(),
    })
}
