//! The two pipeline stages: evidence synthesis and module generation.

pub mod module;
pub mod profile;

pub use module::ModuleAgent;
pub use profile::ProfileAgent;

/// Extract a JSON object from text that might contain markdown code blocks
pub(crate) fn extract_json(text: &str) -> Result<String, String> {
    let trimmed = text.trim();

    // Direct JSON object
    if trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    // Wrapped in ```json ... ```
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return Ok(after[..end].trim().to_string());
        }
    }

    // Wrapped in ``` ... ```
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return Ok(after[..end].trim().to_string());
        }
    }

    Err(format!("Could not extract JSON from response: {trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_json_object() {
        assert_eq!(extract_json(r#" {"a": 1} "#).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn unwraps_json_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn unwraps_plain_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn rejects_prose_without_json() {
        assert!(extract_json("no module here").is_err());
    }
}
