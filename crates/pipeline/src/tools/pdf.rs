//! Text extraction from local PDF folders.

use std::path::Path;

use serde_json::{Map, Value as JsonValue, json};

/// Marker returned for files that parse but yield no text.
const NO_TEXT_MARKER: &str =
    "[No text could be extracted. The file might be image-based or corrupted.]";

/// Extract text from every PDF in a folder.
///
/// Returns a filename -> text mapping. A missing folder comes back as a
/// descriptive error payload rather than a failure; unreadable files get
/// an explicit marker so the agent knows they were seen.
pub fn extract_folder(folder: &Path) -> JsonValue {
    if !folder.is_dir() {
        return json!({
            "error": format!("Folder '{}' not found.", folder.display())
        });
    }

    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            return json!({
                "error": format!("Could not read folder '{}': {e}", folder.display())
            });
        }
    };

    let mut texts = Map::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(".pdf") {
            continue;
        }

        let text = extract_file(&path).unwrap_or_else(|| NO_TEXT_MARKER.to_string());
        texts.insert(name.to_string(), JsonValue::String(text));
    }

    JsonValue::Object(texts)
}

/// Extract text from a single PDF, `None` on any parse failure or when the
/// document contains no text layer.
fn extract_file(path: &Path) -> Option<String> {
    let text = pdf_extract::extract_text(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
