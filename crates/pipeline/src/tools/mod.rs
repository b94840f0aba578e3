//! Evidence-gathering tools exposed to the profile agent.
//!
//! Every tool returns a JSON payload with an `error` field instead of
//! propagating failures: the agent is expected to treat a failed fetch as
//! "information not available" and move on. Transient HTTP failures are
//! retried once after a fixed delay.

pub mod pdf;
pub mod pubmed;
pub mod trials;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Value as JsonValue, json};

use crate::ai::client::Tool;
use crate::config::Config;

/// Result-count bound applied to both search tools.
pub const MAX_SEARCH_RESULTS: u32 = 50;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const FETCH_ATTEMPTS: u32 = 2;

/// Define the evidence tools available to the profile agent
pub fn evidence_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "extract_text_from_pdfs_in_folder".to_string(),
            description: "Extract text from every PDF file in a local folder. \
                          Use this first when the user references local documents."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "folder_path": {
                        "type": "string",
                        "description": "Path to the directory containing PDF files"
                    }
                },
                "required": ["folder_path"],
                "additionalProperties": false
            }),
        },
        Tool {
            name: "pubmed_search".to_string(),
            description: "Search PubMed for articles matching a query term and \
                          return article metadata (PMID, title, journal, date)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "term": {
                        "type": "string",
                        "description": "PubMed query, e.g. \"asthma AND (epidemiology OR prevalence)\""
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of articles to return (clamped to 50)"
                    }
                },
                "required": ["term", "max_results"],
                "additionalProperties": false
            }),
        },
        Tool {
            name: "pubmed_get_fulltext_from_pmc".to_string(),
            description: "Fetch full text for a PubMed article via PubMed Central \
                          when available, plus its title, journal, date and abstract."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pmid": {
                        "type": "string",
                        "description": "The article's PubMed ID"
                    }
                },
                "required": ["pmid"],
                "additionalProperties": false
            }),
        },
        Tool {
            name: "clinicaltrials_search".to_string(),
            description: "Search ClinicalTrials.gov for studies matching a disease \
                          or condition name.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "condition": {
                        "type": "string",
                        "description": "Disease or condition name, e.g. \"type 2 diabetes\""
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of trials to return (clamped to 50)"
                    }
                },
                "required": ["condition", "max_results"],
                "additionalProperties": false
            }),
        },
        Tool {
            name: "clinicaltrials_get_full_content".to_string(),
            description: "Fetch detailed content for one ClinicalTrials.gov study: \
                          descriptions, eligibility, arms, interventions and outcomes."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "nct_id": {
                        "type": "string",
                        "description": "The study's NCT identifier, e.g. \"NCT01234567\""
                    }
                },
                "required": ["nct_id"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Shared handle for the evidence tools: HTTP client, API keys and the
/// flat memo caches for ClinicalTrials.gov lookups.
pub struct ToolSet {
    http: reqwest::Client,
    ncbi_api_key: Option<String>,
    trial_search_cache: Mutex<HashMap<String, JsonValue>>,
    trial_study_cache: Mutex<HashMap<String, JsonValue>>,
}

impl ToolSet {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            ncbi_api_key: config.ncbi_api_key.clone(),
            trial_search_cache: Mutex::new(HashMap::new()),
            trial_study_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a tool call and return its payload as a JSON string.
    ///
    /// Never fails: unknown tools and bad arguments come back as error
    /// payloads the model can read.
    pub async fn execute(&self, name: &str, input: &JsonValue) -> String {
        let payload = match name {
            "extract_text_from_pdfs_in_folder" => {
                let folder = input
                    .get("folder_path")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("")
                    .to_string();
                if folder.is_empty() {
                    json!({"error": "Missing folder_path argument."})
                } else {
                    // pdf parsing is CPU-bound and blocking
                    let path = PathBuf::from(folder);
                    tokio::task::spawn_blocking(move || pdf::extract_folder(&path))
                        .await
                        .unwrap_or_else(|e| json!({"error": format!("PDF task failed: {e}")}))
                }
            }
            "pubmed_search" => {
                let term = input.get("term").and_then(JsonValue::as_str).unwrap_or("");
                let max = clamp_results(input.get("max_results").and_then(JsonValue::as_u64));
                pubmed::search(&self.http, self.ncbi_api_key.as_deref(), term, max).await
            }
            "pubmed_get_fulltext_from_pmc" => {
                let pmid = input.get("pmid").and_then(JsonValue::as_str).unwrap_or("");
                pubmed::fulltext_from_pmc(&self.http, self.ncbi_api_key.as_deref(), pmid).await
            }
            "clinicaltrials_search" => {
                let condition = input
                    .get("condition")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("");
                let max = clamp_results(input.get("max_results").and_then(JsonValue::as_u64));
                trials::search(
                    &self.http,
                    &self.trial_search_cache,
                    condition,
                    max,
                )
                .await
            }
            "clinicaltrials_get_full_content" => {
                let nct_id = input
                    .get("nct_id")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("");
                trials::full_content(&self.http, &self.trial_study_cache, nct_id).await
            }
            _ => json!({"error": format!("Unknown tool: {name}")}),
        };

        serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Clamp a requested result count into 1..=MAX_SEARCH_RESULTS.
pub(crate) fn clamp_results(requested: Option<u64>) -> u32 {
    let requested = requested.unwrap_or(10);
    requested.clamp(1, u64::from(MAX_SEARCH_RESULTS)) as u32
}

/// GET a URL with query parameters, retrying once after a fixed delay on
/// transient failure. Returns the response body as text.
pub(crate) async fn get_with_retry(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<String, String> {
    let mut last_error = String::new();
    for attempt in 1..=FETCH_ATTEMPTS {
        match http.get(url).query(params).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) => last_error = format!("Error reading response from {url}: {e}"),
                },
                Err(e) => last_error = format!("Error calling {url}: {e}"),
            },
            Err(e) => last_error = format!("Error calling {url}: {e}"),
        }
        if attempt < FETCH_ATTEMPTS {
            tracing::debug!(url, attempt, "Fetch failed, retrying after delay");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    Err(last_error)
}
