use super::{Deadline, Extract};
use crate::error::IngestError;
use crate::models::{ExtractionResult, Metadata};
use csv::{ByteRecord, ReaderBuilder, StringRecord};
use serde_json::Value;

/// CSV extraction. Only the first `max_rows` data rows are rendered; the rest
/// are dropped and the result is marked truncated.
#[derive(Debug, Clone, Copy)]
pub struct TabularExtractor {
    max_rows: usize,
}

impl TabularExtractor {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

impl Extract for TabularExtractor {
    fn extract_until(&self, bytes: &[u8], deadline: Deadline) -> Result<ExtractionResult, IngestError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        if columns.iter().all(|column| column.is_empty()) {
            return Err(IngestError::Csv("csv has no header row".to_string()));
        }

        let mut lines = vec![format!("Columns: {}", columns.join(", "))];
        let mut rows = 0usize;
        for record in reader.records().take(self.max_rows) {
            deadline.check()?;
            let record = record?;
            lines.push(render_row(&columns, &record));
            rows += 1;
        }

        // Peek without UTF-8 validation; a bad row past the cap is never read.
        let truncated = rows == self.max_rows
            && reader
                .read_byte_record(&mut ByteRecord::new())
                .unwrap_or(false);

        let mut metadata = Metadata::new();
        metadata.insert("csv_columns".to_string(), Value::from(columns.clone()));
        metadata.insert("column_count".to_string(), Value::from(columns.len()));
        metadata.insert("csv_rows".to_string(), Value::from(rows));
        metadata.insert("truncated".to_string(), Value::from(truncated));

        let text = lines.join("\n");
        if truncated {
            Ok(ExtractionResult::degraded(text, metadata))
        } else {
            Ok(ExtractionResult::complete(text, metadata))
        }
    }
}

fn render_row(columns: &[String], record: &StringRecord) -> String {
    record
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(index, value)| match columns.get(index) {
            Some(column) if !column.is_empty() => format!("{column}: {}", value.trim()),
            _ => value.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionStatus;

    #[test]
    fn renders_columns_and_rows() {
        let csv = b"name, role ,city\nAda,engineer,London\nGrace,admiral,\n";
        let result = TabularExtractor::new(100)
            .extract(csv)
            .expect("csv should parse");

        let lines: Vec<&str> = result.text.lines().collect();
        assert_eq!(lines[0], "Columns: name, role, city");
        assert_eq!(lines[1], "name: Ada | role: engineer | city: London");
        assert_eq!(lines[2], "name: Grace | role: admiral");
        assert_eq!(result.metadata["csv_rows"], 2);
        assert_eq!(result.metadata["column_count"], 3);
        assert_eq!(result.status, ExtractionStatus::Complete);
    }

    #[test]
    fn rows_beyond_cap_are_dropped() {
        let mut csv = String::from("id,value\n");
        for row in 0..10 {
            csv.push_str(&format!("{row},v{row}\n"));
        }

        let result = TabularExtractor::new(3)
            .extract(csv.as_bytes())
            .expect("csv should parse");

        assert_eq!(result.metadata["csv_rows"], 3);
        assert_eq!(result.metadata["truncated"], true);
        assert!(result.text.contains("value: v2"));
        assert!(!result.text.contains("value: v3"));
        assert_eq!(result.status, ExtractionStatus::Degraded);
    }

    #[test]
    fn exactly_cap_rows_is_not_truncated() {
        let result = TabularExtractor::new(2)
            .extract(b"a,b\n1,2\n3,4\n")
            .expect("csv should parse");
        assert_eq!(result.metadata["truncated"], false);
    }

    #[test]
    fn ragged_rows_are_tolerated() {
        let result = TabularExtractor::new(10)
            .extract(b"a,b\n1\n2,3,4\n")
            .expect("flexible reader accepts ragged rows");
        assert!(result.text.contains("a: 2 | b: 3 | 4"));
    }

    #[test]
    fn undecodable_rows_fail() {
        let result = TabularExtractor::new(10).extract(b"a,b\n\xff\xfe,\x80\n");
        assert!(matches!(result, Err(IngestError::Csv(_))));
    }

    #[test]
    fn expired_deadline_stops_the_row_loop() {
        let result = TabularExtractor::new(10)
            .extract_until(b"a,b\n1,2\n", Deadline::after(std::time::Duration::ZERO));
        assert!(matches!(result, Err(IngestError::Timeout(_))));
    }

    #[test]
    fn empty_input_fails() {
        let result = TabularExtractor::new(10).extract(b"");
        assert!(matches!(result, Err(IngestError::Csv(_))));
    }
}
