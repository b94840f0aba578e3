//! Evidence synthesizer: the tool-calling agent that turns a disease name
//! or document-folder reference into a numbered disease profile.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ai::ModelBackend;
use crate::ai::client::{ContentBlock, Message};
use crate::error::PipelineError;
use crate::orchestrator::{AgentEvent, Stage};
use crate::session::SessionState;
use crate::tools::{ToolSet, evidence_tools};

const STAGE_NAME: &str = "disease_profile";

/// Maximum agentic loop iterations to prevent runaway
const MAX_ITERATIONS: u32 = 10;

const SYSTEM_PROMPT: &str = r#"You are a biomedical disease profile generator with tool access.

Your job: use the tools (local PDFs, PubMed, ClinicalTrials.gov) to collect evidence, then produce a population-level, statistical disease profile suitable for driving a synthetic-patient simulation.

TOOL SELECTION:
1) If the user provides a folder path or clearly refers to local PDFs, FIRST call extract_text_from_pdfs_in_folder with that path and treat the PDF text as the primary source. Fill gaps with PubMed and ClinicalTrials.gov.
2) If the user gives only a disease or condition name, use PubMed and ClinicalTrials.gov, one tool at a time. For population-level information (prevalence, incidence, demographics, risk factors, symptom frequencies, natural history), prefer pubmed_search with epidemiology-biased terms such as "<disease> AND (epidemiology OR prevalence OR incidence OR population-based)", then pubmed_get_fulltext_from_pmc for key PMIDs. For treatment and outcome details, use clinicaltrials_search and clinicaltrials_get_full_content.

RULES:
- ALWAYS call at least one tool before answering.
- You may call tools multiple times with refined terms if results lack epidemiology or disease-level statistics.
- Base your answer ONLY on tool outputs; never on your own medical knowledge.
- Do NOT invent numbers, statistics, codes, drug names or clinical details. If a detail is not available in the sources, write: "Information on <aspect> is not available in the provided sources."

Cover, when and only when the sources support it: prevalence and incidence; demographics; risk factors; etiology and subtypes; symptoms with frequencies; diagnosis and tests; disease states and progression; treatments and quantified outcomes; adverse events; exacerbation rates; long-term outcomes. Report ranges only when explicitly supported.

OUTPUT FORMAT:
- Provide ONLY the final disease profile as a numbered list (1. ... 2. ... 3. ...), aiming for 20-60 points when the sources allow.
- No section headings, no markdown, no tool narration, no text outside the numbered items."#;

/// Stage one: gathers evidence through the tool set and emits the disease
/// profile as its final answer.
pub struct ProfileAgent {
    backend: Arc<dyn ModelBackend>,
    tools: Arc<ToolSet>,
}

impl ProfileAgent {
    pub fn new(backend: Arc<dyn ModelBackend>, tools: Arc<ToolSet>) -> Self {
        Self { backend, tools }
    }
}

#[async_trait]
impl Stage for ProfileAgent {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(
        &self,
        request: &str,
        _state: &mut SessionState,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), PipelineError> {
        let tools = evidence_tools();
        let mut messages = vec![Message::user_text(request)];

        for iteration in 0..MAX_ITERATIONS {
            let response = self
                .backend
                .send(Some(SYSTEM_PROMPT), messages.clone(), Some(tools.clone()))
                .await?;

            tracing::debug!(
                iteration,
                stop_reason = %response.stop_reason,
                "Profile agent iteration"
            );

            if response.stop_reason != "tool_use" {
                // Final answer (or an unexpected stop; either way, this is
                // what the model gave us)
                let fragments = response.text_fragments();
                let _ = events
                    .send(AgentEvent::Final {
                        stage: STAGE_NAME,
                        fragments,
                    })
                    .await;
                return Ok(());
            }

            let tool_uses = response.tool_uses();
            messages.push(Message::assistant_blocks(response.content));

            // Tool calls run one at a time; no concurrent fan-out
            let mut result_blocks = Vec::new();
            for (tool_id, tool_name, tool_input) in tool_uses {
                tracing::info!(tool = %tool_name, "Executing evidence tool");
                let _ = events
                    .send(AgentEvent::ToolCall {
                        stage: STAGE_NAME,
                        name: tool_name.clone(),
                        input: tool_input.clone(),
                    })
                    .await;

                let result = self.tools.execute(&tool_name, &tool_input).await;

                let _ = events
                    .send(AgentEvent::ToolResult {
                        stage: STAGE_NAME,
                        name: tool_name,
                        content: result.clone(),
                    })
                    .await;

                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: tool_id,
                    content: result,
                });
            }
            messages.push(Message::user_blocks(result_blocks));
        }

        Err(PipelineError::IterationsExceeded(MAX_ITERATIONS))
    }
}
