//! Module generator: turns the committed disease profile into one valid
//! GMF module JSON via the validate-repair loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use gmf_core::validate::{CandidateVerdict, validate_candidate};
use gmf_core::DiseaseProfile;

use crate::ai::ModelBackend;
use crate::ai::client::Message;
use crate::agent::extract_json;
use crate::error::PipelineError;
use crate::orchestrator::{AgentEvent, Stage};
use crate::session::{DISEASE_PROFILE_KEY, MODULE_JSON_KEY, SessionState};

const STAGE_NAME: &str = "synthea_module";

/// Attempt budget for the validate-repair loop.
pub const DEFAULT_REPAIR_ATTEMPTS: u32 = 5;

const SYSTEM_PROMPT: &str = r#"You are an expert developer for the Synthea synthetic patient generator. You generate Synthea Generic Module Framework (GMF) modules as JSON, in a SAFE MODE that prioritizes schema correctness and simplicity over clinical richness.

INPUT: a disease profile (a numbered list of facts).
OUTPUT: a single valid GMF JSON module (minified), nothing else.

HARD RULES:
1. Do not use "exact", "range", "unit", "distribution" or any numeric fields for clinical measurements anywhere.
2. Use ONLY these state types: "Initial", "Terminal", "Guard", "Encounter", "EncounterEnd", "ConditionOnset", "MedicationOrder", "Procedure", "Observation", "Death". No other type.
3. Transitions: ONLY "direct_transition": "State_Name". Never distributed_transition, conditional_transition, complex_transition, lookup_table_transition or type_of_care_transition. For branching or eligibility, use a single "Guard" state with a simple "allow" condition (Gender, or Age with operator/quantity/unit "years") and a deterministic direct_transition.
4. Observations carry only qualitative results: "category", "codes" and an optional "value_code". Never numeric quantities.
5. MedicationOrder and Procedure states occur after an Encounter and before an EncounterEnd, with "codes" and an optional "reason".

ROOT STRUCTURE: {"name": string, "gmf_version": 2, "remarks": [strings], "states": {...}} with exactly one state named "Initial" of type "Initial" and at least one state of type "Terminal". Terminal states have no transition field. Every non-terminal state has exactly one direct_transition naming an existing state, and every state must lie on a path to a Terminal state.

CODE POLICY (VERY IMPORTANT):
- Your ONLY clinical source of truth is the disease profile given below. Never use outside medical knowledge.
- You may use a terminology code ONLY if it appears verbatim in the disease profile. Otherwise use a placeholder: SNOMED-CT or RxNorm code "999999", LOINC code "99999-9". You may vary the "display" text descriptively (e.g. "Placeholder Negative Result") but the code itself must be the artificial placeholder. Never output a real or realistic-looking code you were not given, even a "generic" one such as 260413007.
- If the profile omits treatments, tests, procedures or outcomes, represent them only as clearly-labeled placeholder states and codes, or leave them out.

WORKFLOW SHAPE: a simple linear or near-linear flow, e.g. Initial -> (optional Guard) -> Encounter -> ConditionOnset -> optional Observations -> optional MedicationOrder/Procedure -> EncounterEnd -> (optional Death) -> Terminal.

OUTPUT ONLY the final JSON object. No backticks, no explanations, no text around the JSON."#;

/// Stage two: reads the profile from session state, generates a module
/// candidate, and repairs it until it passes syntax and structural
/// validation or the attempt budget runs out.
pub struct ModuleAgent {
    backend: Arc<dyn ModelBackend>,
    max_attempts: u32,
}

impl ModuleAgent {
    pub fn new(backend: Arc<dyn ModelBackend>, max_attempts: u32) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl Stage for ModuleAgent {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(
        &self,
        _request: &str,
        state: &mut SessionState,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), PipelineError> {
        // Contract: the orchestrator committed the profile before this
        // stage started. Read it from state, never from the request.
        let profile_text = state
            .get_text(DISEASE_PROFILE_KEY)
            .ok_or_else(|| {
                PipelineError::MissingProfile(format!(
                    "session state holds no \"{DISEASE_PROFILE_KEY}\" entry"
                ))
            })?
            .to_string();
        let profile = DiseaseProfile::new(profile_text);

        let mut messages = vec![Message::user_text(format!(
            "DISEASE PROFILE:\n{profile}\n\nGenerate the GMF JSON module for this profile."
        ))];
        let mut last_defect = String::new();

        for attempt in 1..=self.max_attempts {
            let response = self
                .backend
                .send(Some(SYSTEM_PROMPT), messages.clone(), None)
                .await?;

            let raw = response.text_fragments().join("\n");
            let candidate = match extract_json(&raw) {
                Ok(candidate) => candidate,
                Err(reason) => {
                    tracing::warn!(attempt, "Candidate contained no JSON object");
                    last_defect = reason.clone();
                    self.emit_verdict(&events, attempt, false, &reason).await;
                    messages.push(Message::assistant_blocks(response.content));
                    messages.push(Message::user_text(format!(
                        "Your answer contained no JSON object ({reason}). \
                         Return ONLY the corrected GMF module as a single JSON object."
                    )));
                    continue;
                }
            };

            match validate_candidate(&candidate, &profile) {
                CandidateVerdict::Valid => {
                    tracing::info!(attempt, "Module candidate validated");
                    self.emit_verdict(&events, attempt, true, "").await;
                    state.put_text(MODULE_JSON_KEY, &candidate);
                    let _ = events
                        .send(AgentEvent::Final {
                            stage: STAGE_NAME,
                            fragments: vec![candidate],
                        })
                        .await;
                    return Ok(());
                }
                CandidateVerdict::SyntaxError(reason) => {
                    tracing::warn!(attempt, %reason, "Candidate failed syntax validation");
                    last_defect = reason.clone();
                    self.emit_verdict(&events, attempt, false, &reason).await;
                    messages.push(Message::assistant_blocks(response.content));
                    messages.push(Message::user_text(format!(
                        "The JSON was invalid: {reason}\n\
                         Correct it and return ONLY the full module as a single JSON object."
                    )));
                }
                CandidateVerdict::StructureErrors(report) => {
                    tracing::warn!(
                        attempt,
                        defects = report.defects.len(),
                        "Candidate failed structural validation"
                    );
                    last_defect = report.to_string();
                    self.emit_verdict(&events, attempt, false, &last_defect).await;
                    messages.push(Message::assistant_blocks(response.content));
                    messages.push(Message::user_text(format!(
                        "The JSON parsed but violates the module rules:\n{report}\
                         Fix every listed problem and return ONLY the full corrected \
                         module as a single JSON object."
                    )));
                }
            }
        }

        Err(PipelineError::GenerationExhausted {
            attempts: self.max_attempts,
            last_defect,
        })
    }
}

impl ModuleAgent {
    /// Surface each validation round as tool-style events so callers can
    /// watch the repair loop without ever seeing diagnostics in the final
    /// answer.
    async fn emit_verdict(
        &self,
        events: &mpsc::Sender<AgentEvent>,
        attempt: u32,
        is_valid: bool,
        reason: &str,
    ) {
        let _ = events
            .send(AgentEvent::ToolCall {
                stage: STAGE_NAME,
                name: "validate_json".to_string(),
                input: json!({"attempt": attempt}),
            })
            .await;
        let _ = events
            .send(AgentEvent::ToolResult {
                stage: STAGE_NAME,
                name: "validate_json".to_string(),
                content: json!({"is_valid": is_valid, "reason": reason}).to_string(),
            })
            .await;
    }
}
