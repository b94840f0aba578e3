//! In-memory session state shared between pipeline stages.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Canonical key the orchestrator writes the disease profile under.
pub const DISEASE_PROFILE_KEY: &str = "disease_profile";
/// Legacy fallback key some earlier runs wrote the profile under.
pub const DISEASE_PROFILE_TEXT_KEY: &str = "disease_profile_text";
/// Key the module generator writes its final JSON under.
pub const MODULE_JSON_KEY: &str = "synthea_module_json";

/// Conversation-scoped key-value store.
///
/// Created empty at session start, mutated once per stage (profile key by
/// stage one's commit, module key by stage two), and discarded with the
/// session. Nothing is persisted across process restarts.
#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    values: HashMap<String, JsonValue>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            values: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Fetch a string value; `None` when absent, non-string, or empty
    /// after trimming.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn put(&mut self, key: impl Into<String>, value: JsonValue) {
        self.values.insert(key.into(), value);
    }

    pub fn put_text(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.values
            .insert(key.into(), JsonValue::String(text.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
