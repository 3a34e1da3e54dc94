use crate::models::{ExtractionResult, Metadata};
use serde_json::Value;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes plain text. UTF-8 first; anything else is read as Latin-1, which
/// maps every byte to a char and so cannot fail.
pub fn decode_text(bytes: &[u8]) -> ExtractionResult {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut metadata = Metadata::new();

    let (text, lossless) = match std::str::from_utf8(body) {
        Ok(decoded) => {
            metadata.insert("encoding".to_string(), Value::from("utf-8"));
            (decoded.trim().to_string(), true)
        }
        Err(_) => {
            metadata.insert("encoding".to_string(), Value::from("latin-1"));
            let decoded: String = body.iter().map(|&byte| char::from(byte)).collect();
            (decoded.trim().to_string(), false)
        }
    };

    if lossless && !text.is_empty() {
        ExtractionResult::complete(text, metadata)
    } else {
        ExtractionResult::degraded(text, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::decode_text;
    use crate::models::ExtractionStatus;

    #[test]
    fn utf8_with_bom_is_complete() {
        let result = decode_text("\u{feff}  Grüße aus Köln \n".as_bytes());
        assert_eq!(result.text, "Grüße aus Köln");
        assert_eq!(result.status, ExtractionStatus::Complete);
        assert_eq!(result.metadata["encoding"], "utf-8");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let result = decode_text(b"caf\xE9 cr\xE8me");
        assert_eq!(result.text, "café crème");
        assert_eq!(result.status, ExtractionStatus::Degraded);
        assert_eq!(result.metadata["encoding"], "latin-1");
    }

    #[test]
    fn empty_input_is_degraded_not_an_error() {
        let result = decode_text(b"   \n");
        assert!(result.text.is_empty());
        assert_eq!(result.status, ExtractionStatus::Degraded);
    }
}
