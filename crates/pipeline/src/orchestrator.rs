//! Two-stage pipeline orchestrator.
//!
//! Runs the evidence synthesizer to completion, commits its final text to
//! session state under the canonical profile key, then runs the module
//! generator. Events from both stages are relayed to the caller's sink in
//! the exact order produced; the orchestrator only inspects final
//! emissions. The stages never run concurrently: the profile commit
//! happens-before the module generator's first read.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::session::{DISEASE_PROFILE_KEY, DISEASE_PROFILE_TEXT_KEY, SessionState};

/// An event emitted by a running stage.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The model invoked a tool.
    ToolCall {
        stage: &'static str,
        name: String,
        input: JsonValue,
    },
    /// A tool invocation returned.
    ToolResult {
        stage: &'static str,
        name: String,
        content: String,
    },
    /// A final answer, as ordered text fragments.
    Final {
        stage: &'static str,
        fragments: Vec<String>,
    },
}

/// One pipeline stage: consumes the request and session state, emits
/// events (intermediate tool traffic plus a final answer) into a channel.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        request: &str,
        state: &mut SessionState,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), PipelineError>;
}

/// Sequences the evidence synthesizer and the module generator.
pub struct Orchestrator {
    profile_stage: Box<dyn Stage>,
    module_stage: Box<dyn Stage>,
}

impl Orchestrator {
    pub fn new(profile_stage: Box<dyn Stage>, module_stage: Box<dyn Stage>) -> Self {
        Self {
            profile_stage,
            module_stage,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// The caller must keep draining `sink` while this runs; stage events
    /// are forwarded through it as they are produced. The returned string
    /// is the module generator's final emission, verbatim.
    pub async fn run(
        &self,
        request: &str,
        state: &mut SessionState,
        sink: mpsc::Sender<AgentEvent>,
    ) -> Result<String, PipelineError> {
        tracing::info!(session = %state.id(), "Starting profile -> module pipeline");

        tracing::info!(stage = self.profile_stage.name(), "Running evidence stage");
        let profile_text = self
            .run_stage(&*self.profile_stage, request, state, &sink)
            .await?;

        // Fallback: a stage may have written the profile to state directly
        // instead of emitting it as a final answer.
        let profile_text = profile_text.or_else(|| {
            state
                .get_text(DISEASE_PROFILE_KEY)
                .or_else(|| state.get_text(DISEASE_PROFILE_TEXT_KEY))
                .map(str::to_string)
        });

        let Some(profile_text) = profile_text else {
            tracing::error!("No disease profile text produced; aborting pipeline");
            return Err(PipelineError::MissingProfile(
                "evidence stage emitted no final text and no fallback key held a profile"
                    .to_string(),
            ));
        };

        state.put_text(DISEASE_PROFILE_KEY, &profile_text);
        tracing::info!(
            chars = profile_text.len(),
            "Committed disease profile to session state"
        );

        tracing::info!(stage = self.module_stage.name(), "Running module stage");
        let module_json = self
            .run_stage(&*self.module_stage, request, state, &sink)
            .await?;

        tracing::info!("Pipeline completed");
        module_json.ok_or_else(|| PipelineError::NoFinalOutput(self.module_stage.name().to_string()))
    }

    /// Drive one stage while relaying its events to the caller's sink.
    ///
    /// Returns the text of the stage's last final emission: fragments
    /// concatenated in order and trimmed, with empty results mapped to
    /// `None`.
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        request: &str,
        state: &mut SessionState,
        sink: &mpsc::Sender<AgentEvent>,
    ) -> Result<Option<String>, PipelineError> {
        let (tx, rx) = mpsc::channel(32);

        let relay = async {
            let mut rx = rx;
            let mut captured: Option<String> = None;
            while let Some(event) = rx.recv().await {
                if let AgentEvent::Final { fragments, .. } = &event {
                    captured = Some(fragments.join("\n").trim().to_string());
                }
                // Keep draining stage events even if the caller hung up.
                let _ = sink.send(event).await;
            }
            captured
        };

        let (result, captured) = tokio::join!(stage.run(request, state, tx), relay);
        result?;
        Ok(captured.filter(|text| !text.is_empty()))
    }
}
