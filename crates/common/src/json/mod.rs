//! Helpers for pulling JSON out of free-form model output

use crate::errors::{AppError, Result};

/// Return the span from the first `{` to the last `}` inclusive.
///
/// Chat models often wrap the requested object in prose or a ```json fence;
/// this keeps only the object. The span is not validated as JSON here.
pub fn extract_json_object(text: &str) -> Result<&str> {
    let start = text.find('{').ok_or_else(|| AppError::InvalidFormat {
        message: "no opening '{' found".to_string(),
    })?;

    let end = text.rfind('}').ok_or_else(|| AppError::InvalidFormat {
        message: "no closing '}' found".to_string(),
    })?;

    if end < start {
        return Err(AppError::InvalidFormat {
            message: "closing '}' appears before opening '{'".to_string(),
        });
    }

    Ok(&text[start..=end])
}

/// Undo `\u0026` escaping so snapshots keep readable URLs
pub fn unescape_ampersands(json: &str) -> String {
    json.replace("\\u0026", "&")
}
