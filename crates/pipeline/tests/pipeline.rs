//! Integration tests for the profile -> module pipeline.
//!
//! These drive the orchestrator and both agents with scripted model
//! backends, so every run is deterministic and offline. The scripts stand
//! in for the generative model; everything else is the real code path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use gmf_pipeline::agent::{ModuleAgent, ProfileAgent};
use gmf_pipeline::ai::ModelBackend;
use gmf_pipeline::ai::client::{ApiResponse, ContentBlock, Message, Tool};
use gmf_pipeline::config::Config;
use gmf_pipeline::error::PipelineError;
use gmf_pipeline::orchestrator::{AgentEvent, Orchestrator, Stage};
use gmf_pipeline::session::{
    DISEASE_PROFILE_KEY, DISEASE_PROFILE_TEXT_KEY, MODULE_JSON_KEY, SessionState,
};
use gmf_pipeline::tools::ToolSet;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A model backend that replays a fixed script of responses.
struct ScriptedBackend {
    script: Mutex<VecDeque<ApiResponse>>,
    /// When the script runs dry, keep replaying this response instead of
    /// failing. Used by the termination test.
    repeat_last: bool,
    last: Mutex<Option<ApiResponse>>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    fn new(responses: Vec<ApiResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            repeat_last: false,
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    fn repeating(response: ApiResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            repeat_last: true,
            last: Mutex::new(Some(response)),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn send(
        &self,
        _system: Option<&str>,
        _messages: Vec<Message>,
        _tools: Option<Vec<Tool>>,
    ) -> Result<ApiResponse, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *self.last.lock().unwrap() = Some(next.clone());
            return Ok(next);
        }
        if self.repeat_last {
            if let Some(last) = self.last.lock().unwrap().clone() {
                return Ok(last);
            }
        }
        Err(PipelineError::Backend("script exhausted".to_string()))
    }
}

fn text_response(text: &str) -> ApiResponse {
    ApiResponse {
        id: "msg_test".to_string(),
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: "end_turn".to_string(),
    }
}

fn tool_use_response(tool_name: &str, input: serde_json::Value) -> ApiResponse {
    ApiResponse {
        id: "msg_test".to_string(),
        content: vec![ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: tool_name.to_string(),
            input,
        }],
        stop_reason: "tool_use".to_string(),
    }
}

/// A scripted stage for orchestrator-only tests.
struct FakeStage {
    name: &'static str,
    final_fragments: Option<Vec<String>>,
    /// Written to state before finishing, when set.
    state_write: Option<(&'static str, String)>,
    invoked: Arc<AtomicBool>,
    profile_seen: Arc<Mutex<Option<String>>>,
}

impl FakeStage {
    fn new(name: &'static str, final_fragments: Option<Vec<String>>) -> Self {
        Self {
            name,
            final_fragments,
            state_write: None,
            invoked: Arc::new(AtomicBool::new(false)),
            profile_seen: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Stage for FakeStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        _request: &str,
        state: &mut SessionState,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), PipelineError> {
        self.invoked.store(true, Ordering::SeqCst);
        *self.profile_seen.lock().unwrap() = state
            .get_text(DISEASE_PROFILE_KEY)
            .map(str::to_string);

        if let Some((key, value)) = &self.state_write {
            state.put_text(*key, value.clone());
        }
        if let Some(fragments) = &self.final_fragments {
            let _ = events
                .send(AgentEvent::Final {
                    stage: self.name,
                    fragments: fragments.clone(),
                })
                .await;
        }
        Ok(())
    }
}

/// Run the orchestrator, collecting all relayed events.
async fn run_collected(
    orchestrator: &Orchestrator,
    request: &str,
    state: &mut SessionState,
) -> (Result<String, PipelineError>, Vec<AgentEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let result = orchestrator.run(request, state, tx).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

fn twenty_five_fact_profile() -> String {
    (1..=25)
        .map(|i| format!("{i}. Malaria fact number {i}."))
        .collect::<Vec<_>>()
        .join("\n")
}

fn malaria_module_json() -> String {
    json!({
        "name": "Malaria_Module",
        "gmf_version": 2,
        "remarks": ["Module generated from disease profile for Malaria."],
        "states": {
            "Initial": {"type": "Initial", "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }
    })
    .to_string()
}

fn test_toolset() -> Arc<ToolSet> {
    static TOOLS: OnceLock<Arc<ToolSet>> = OnceLock::new();
    TOOLS
        .get_or_init(|| Arc::new(ToolSet::new(&Config::default())))
        .clone()
}

// ---------------------------------------------------------------------------
// Orchestrator sequencing and abort behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn profile_commit_happens_before_module_stage_reads() {
    let profile = FakeStage::new(
        "profile",
        Some(vec![twenty_five_fact_profile()]),
    );
    let module = FakeStage::new("module", Some(vec!["{}".to_string()]));
    let module_seen = module.profile_seen.clone();

    let orchestrator = Orchestrator::new(Box::new(profile), Box::new(module));
    let mut state = SessionState::new();
    let (result, _) = run_collected(&orchestrator, "Generate profile for Malaria", &mut state).await;

    assert_eq!(result.unwrap(), "{}");
    // The module stage observed the committed profile in session state
    assert_eq!(
        module_seen.lock().unwrap().as_deref(),
        Some(twenty_five_fact_profile().as_str())
    );
    assert_eq!(
        state.get_text(DISEASE_PROFILE_KEY),
        Some(twenty_five_fact_profile().as_str())
    );
}

#[tokio::test]
async fn empty_final_emission_aborts_before_module_stage() {
    // Scenario B: final emission is an empty string, no fallback state
    let profile = FakeStage::new("profile", Some(vec![String::new()]));
    let module = FakeStage::new("module", Some(vec!["{}".to_string()]));
    let module_invoked = module.invoked.clone();

    let orchestrator = Orchestrator::new(Box::new(profile), Box::new(module));
    let mut state = SessionState::new();
    let (result, _) = run_collected(&orchestrator, "Generate profile for Malaria", &mut state).await;

    assert!(matches!(result, Err(PipelineError::MissingProfile(_))));
    assert!(!module_invoked.load(Ordering::SeqCst));
    assert!(!state.contains(MODULE_JSON_KEY));
    assert!(!state.contains(DISEASE_PROFILE_KEY));
}

#[tokio::test]
async fn legacy_state_key_recovers_a_missing_final_emission() {
    let mut profile = FakeStage::new("profile", None);
    profile.state_write = Some((DISEASE_PROFILE_TEXT_KEY, "1. A recovered fact.".to_string()));
    let module = FakeStage::new("module", Some(vec!["{}".to_string()]));
    let module_invoked = module.invoked.clone();

    let orchestrator = Orchestrator::new(Box::new(profile), Box::new(module));
    let mut state = SessionState::new();
    let (result, _) = run_collected(&orchestrator, "Generate profile for Malaria", &mut state).await;

    assert!(result.is_ok());
    assert!(module_invoked.load(Ordering::SeqCst));
    assert_eq!(
        state.get_text(DISEASE_PROFILE_KEY),
        Some("1. A recovered fact.")
    );
}

#[tokio::test]
async fn stage_events_are_relayed_in_order() {
    let profile = FakeStage::new("profile", Some(vec!["1. Fact.".to_string()]));
    let module = FakeStage::new("module", Some(vec!["{}".to_string()]));

    let orchestrator = Orchestrator::new(Box::new(profile), Box::new(module));
    let mut state = SessionState::new();
    let (_, events) = run_collected(&orchestrator, "request", &mut state).await;

    let stages: Vec<&str> = events
        .iter()
        .map(|event| match event {
            AgentEvent::Final { stage, .. }
            | AgentEvent::ToolCall { stage, .. }
            | AgentEvent::ToolResult { stage, .. } => *stage,
        })
        .collect();
    assert_eq!(stages, vec!["profile", "module"]);
}

// ---------------------------------------------------------------------------
// End-to-end with the real agents and scripted backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_profile_to_module_first_attempt() {
    let profile_backend = ScriptedBackend::new(vec![text_response(&twenty_five_fact_profile())]);
    let module_backend = ScriptedBackend::new(vec![text_response(&malaria_module_json())]);

    let orchestrator = Orchestrator::new(
        Box::new(ProfileAgent::new(profile_backend.clone(), test_toolset())),
        Box::new(ModuleAgent::new(module_backend.clone(), 5)),
    );

    let mut state = SessionState::new();
    let (result, _) =
        run_collected(&orchestrator, "Generate profile for Malaria", &mut state).await;

    let output = result.unwrap();
    assert_eq!(output, malaria_module_json());
    assert_eq!(state.get_text(MODULE_JSON_KEY), Some(output.as_str()));
    assert_eq!(
        state.get_text(DISEASE_PROFILE_KEY),
        Some(twenty_five_fact_profile().as_str())
    );
    // One generation each, no repair rounds needed
    assert_eq!(profile_backend.calls(), 1);
    assert_eq!(module_backend.calls(), 1);
}

#[tokio::test]
async fn profile_agent_executes_tool_calls_and_relays_them() {
    let backend = ScriptedBackend::new(vec![
        tool_use_response("no_such_tool", json!({})),
        text_response("1. A fact from evidence."),
    ]);
    let agent = ProfileAgent::new(backend.clone(), test_toolset());

    let mut state = SessionState::new();
    let (tx, mut rx) = mpsc::channel(64);
    agent.run("Generate profile for Malaria", &mut state, tx)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], AgentEvent::ToolCall { name, .. } if name == "no_such_tool"));
    match &events[1] {
        AgentEvent::ToolResult { content, .. } => {
            assert!(content.contains("Unknown tool: no_such_tool"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    assert!(matches!(&events[2], AgentEvent::Final { .. }));
    assert_eq!(backend.calls(), 2);
}

// ---------------------------------------------------------------------------
// Validate-repair loop
// ---------------------------------------------------------------------------

fn seeded_state(profile: &str) -> SessionState {
    let mut state = SessionState::new();
    state.put_text(DISEASE_PROFILE_KEY, profile);
    state
}

#[tokio::test]
async fn scenario_c_syntax_defect_is_repaired() {
    // First candidate has a trailing comma; second is corrected
    let broken = malaria_module_json().replace("\"gmf_version\":2", "\"gmf_version\":2,,");
    let backend = ScriptedBackend::new(vec![
        text_response(&broken),
        text_response(&malaria_module_json()),
    ]);
    let agent = ModuleAgent::new(backend.clone(), 5);

    let mut state = seeded_state("1. Malaria is endemic in tropical regions.");
    let (tx, mut rx) = mpsc::channel(64);
    agent.run("", &mut state, tx).await.unwrap();

    let mut finals = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Final { fragments, .. } = event {
            finals.push(fragments.join(""));
        }
    }
    // The invalid intermediate never reaches the caller
    assert_eq!(finals, vec![malaria_module_json()]);
    assert_eq!(backend.calls(), 2);
    assert_eq!(
        state.get_text(MODULE_JSON_KEY),
        Some(malaria_module_json().as_str())
    );
}

#[tokio::test]
async fn scenario_d_unsourced_code_is_rejected_then_replaced() {
    let profile = "1. Malaria prevalence is high in tropical regions.";
    let with_real_code = json!({
        "name": "Malaria_Module",
        "gmf_version": 2,
        "remarks": [],
        "states": {
            "Initial": {"type": "Initial", "direct_transition": "Onset"},
            "Onset": {
                "type": "ConditionOnset",
                "codes": [{"system": "SNOMED-CT", "code": "260413007", "display": "Negative"}],
                "direct_transition": "Terminal"
            },
            "Terminal": {"type": "Terminal"}
        }
    })
    .to_string();
    let with_placeholder = with_real_code.replace("260413007", "999999");

    let backend = ScriptedBackend::new(vec![
        text_response(&with_real_code),
        text_response(&with_placeholder),
    ]);
    let agent = ModuleAgent::new(backend.clone(), 5);

    let mut state = seeded_state(profile);
    let (tx, mut rx) = mpsc::channel(64);
    agent.run("", &mut state, tx).await.unwrap();

    let final_json = state.get_text(MODULE_JSON_KEY).unwrap();
    assert!(!final_json.contains("260413007"));
    assert!(final_json.contains("999999"));
    assert_eq!(backend.calls(), 2);

    // The validator verdicts were surfaced as tool-style events
    let mut verdicts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::ToolResult { name, content, .. } = event {
            if name == "validate_json" {
                verdicts.push(content);
            }
        }
    }
    assert_eq!(verdicts.len(), 2);
    assert!(verdicts[0].contains("\"is_valid\":false"));
    assert!(verdicts[0].contains("260413007"));
    assert!(verdicts[1].contains("\"is_valid\":true"));
}

#[tokio::test]
async fn repair_loop_terminates_at_the_attempt_budget() {
    // The backend never produces JSON; the loop must stop at the bound
    let backend = ScriptedBackend::repeating(text_response("still not json"));
    let agent = ModuleAgent::new(backend.clone(), 5);

    let mut state = seeded_state("1. A fact.");
    let (tx, _rx) = mpsc::channel(256);
    let result = agent.run("", &mut state, tx).await;

    match result {
        Err(PipelineError::GenerationExhausted { attempts, .. }) => assert_eq!(attempts, 5),
        other => panic!("expected GenerationExhausted, got {other:?}"),
    }
    assert_eq!(backend.calls(), 5);
    assert!(!state.contains(MODULE_JSON_KEY));
}

#[tokio::test]
async fn module_agent_requires_a_committed_profile() {
    let backend = ScriptedBackend::new(vec![text_response(&malaria_module_json())]);
    let agent = ModuleAgent::new(backend.clone(), 5);

    let mut state = SessionState::new();
    let (tx, _rx) = mpsc::channel(64);
    let result = agent.run("", &mut state, tx).await;

    assert!(matches!(result, Err(PipelineError::MissingProfile(_))));
    // The backend is never consulted without a profile
    assert_eq!(backend.calls(), 0);
}
