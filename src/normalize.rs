//! Post-extraction cleanup before persistence.

use serde_json::Value;

use crate::models::ExtractionResult;

/// Clean an extraction result for storage.
///
/// JSONB rejects strings containing U+0000, the `\u0000` escape upstream
/// JSON encoders emit for binary-origin text, so every metadata string is
/// scrubbed, including strings nested in arrays and objects. Content is cut
/// to `max_content_bytes` with a hard cutoff, nudged back only as far as the
/// nearest UTF-8 char boundary.
pub fn normalize(mut result: ExtractionResult, max_content_bytes: usize) -> ExtractionResult {
    for value in result.metadata.values_mut() {
        strip_nul(value);
    }
    if result.content.len() > max_content_bytes {
        let mut cut = max_content_bytes;
        while !result.content.is_char_boundary(cut) {
            cut -= 1;
        }
        result.content.truncate(cut);
    }
    result
}

fn strip_nul(value: &mut Value) {
    match value {
        Value::String(s) if s.contains('\u{0}') => *s = s.replace('\u{0}', ""),
        Value::Array(items) => items.iter_mut().for_each(strip_nul),
        Value::Object(map) => map.values_mut().for_each(strip_nul),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn result_with_meta(meta: Value) -> ExtractionResult {
        let Value::Object(metadata) = meta else {
            panic!("metadata fixture must be an object")
        };
        ExtractionResult {
            content: String::new(),
            metadata,
        }
    }

    #[test]
    fn nul_is_stripped_from_string_values() {
        let result = result_with_meta(json!({ "producer": "Acro\u{0}bat\u{0}" }));
        let cleaned = normalize(result, 1 << 20);
        assert_eq!(cleaned.metadata["producer"], json!("Acrobat"));
    }

    #[test]
    fn nul_is_stripped_from_nested_values() {
        let result = result_with_meta(json!({
            "authors": ["a\u{0}", "b"],
            "pdf": { "title": "t\u{0}" },
        }));
        let cleaned = normalize(result, 1 << 20);
        assert_eq!(cleaned.metadata["authors"], json!(["a", "b"]));
        assert_eq!(cleaned.metadata["pdf"]["title"], json!("t"));
    }

    #[test]
    fn non_string_values_are_untouched() {
        let result = result_with_meta(json!({ "pages": 12, "encrypted": false }));
        let cleaned = normalize(result, 1 << 20);
        assert_eq!(cleaned.metadata["pages"], json!(12));
        assert_eq!(cleaned.metadata["encrypted"], json!(false));
    }

    #[test]
    fn long_content_is_truncated() {
        let result = ExtractionResult {
            content: "x".repeat(100),
            metadata: Map::new(),
        };
        assert_eq!(normalize(result, 64).content.len(), 64);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 63 ASCII bytes followed by a 2-byte char straddling the cutoff
        let content = format!("{}é tail", "x".repeat(63));
        let result = ExtractionResult {
            content,
            metadata: Map::new(),
        };
        let cleaned = normalize(result, 64);
        assert_eq!(cleaned.content, "x".repeat(63));
    }

    #[test]
    fn short_content_is_untouched() {
        let result = ExtractionResult {
            content: "short".to_string(),
            metadata: Map::new(),
        };
        assert_eq!(normalize(result, 64).content, "short");
    }
}
