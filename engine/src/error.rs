//! Structured error types for the Rowpress engine.
//!
//! Each module reports its own failures (`ModelError`, `SourceError`,
//! `SnapshotError`, `RenderError`, `PdfError`); `RowpressError` is the union
//! the binary and embedding applications deal with.

use thiserror::Error;

use crate::model::ModelError;
use crate::pdf::PdfError;
use crate::render::RenderError;
use crate::snapshot::SnapshotError;
use crate::source::SourceError;

/// The unified error type returned by the top-level Rowpress entry points.
#[derive(Debug, Error)]
pub enum RowpressError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("data source: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("PDF generation failed: {0}")]
    Pdf(#[from] PdfError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// A short suggestion for fixing a configuration that failed to parse.
pub fn json_hint(e: &serde_json::Error) -> String {
    match e.classify() {
        serde_json::error::Category::Syntax => {
            "Check for trailing commas, missing quotes, or unescaped characters.".to_string()
        }
        serde_json::error::Category::Data => {
            "The JSON is valid but doesn't match the Rowpress configuration schema. Check field names and types."
                .to_string()
        }
        serde_json::error::Category::Eof => "Unexpected end of input. Is the file truncated?".to_string(),
        serde_json::error::Category::Io => String::new(),
    }
}

/// Render `source` followed by its hint on a second line, if there is one.
pub(crate) fn with_hint(source: &serde_json::Error, hint: &str) -> String {
    if hint.is_empty() {
        source.to_string()
    } else {
        format!("{}\n  Hint: {}", source, hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_for_syntax_error() {
        let e = serde_json::from_str::<serde_json::Value>("{ \"a\": 1,, }").unwrap_err();
        assert!(json_hint(&e).contains("trailing commas"));
    }

    #[test]
    fn test_hint_for_truncated_input() {
        let e = serde_json::from_str::<serde_json::Value>("{ \"a\": ").unwrap_err();
        assert!(json_hint(&e).contains("truncated"));
    }

    #[test]
    fn test_with_hint_formats_second_line() {
        let e = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        let text = with_hint(&e, "look here");
        assert!(text.ends_with("\n  Hint: look here"));
        assert_eq!(with_hint(&e, ""), e.to_string());
    }
}
