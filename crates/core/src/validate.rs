//! Syntax and structural validation for generated module candidates.
//!
//! The syntax check is a pure JSON parse with no policy attached. The
//! structural check enforces the restricted grammar the generator is
//! instructed to follow: the state-type allow-list, the single
//! deterministic transition rule, code provenance against the disease
//! profile, and graph reachability to a terminal state. The repair loop
//! feeds the collected defects back to the generator verbatim.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde_json::Value;

use crate::module::{
    ALLOWED_STATE_TYPES, FORBIDDEN_TRANSITIONS, GMF_VERSION, Module, PLACEHOLDER_LOINC,
    PLACEHOLDER_SNOMED,
};
use crate::profile::DiseaseProfile;

/// Result of the pure JSON syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Check whether a string parses as JSON. Pure, stateless, idempotent.
pub fn check_syntax(input: &str) -> Validation {
    match serde_json::from_str::<Value>(input) {
        Ok(_) => Validation {
            valid: true,
            reason: None,
        },
        Err(e) => Validation {
            valid: false,
            reason: Some(format!("Invalid JSON format: {e}")),
        },
    }
}

/// A single structural violation, located by state name or root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub location: String,
    pub message: String,
}

impl Defect {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// All structural violations found in one candidate.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub defects: Vec<Defect>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.defects.is_empty()
    }

    fn push(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.defects.push(Defect::new(location, message));
    }
}

impl fmt::Display for ValidationReport {
    /// Renders the numbered defect list fed back to the generator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, defect) in self.defects.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, defect)?;
        }
        Ok(())
    }
}

/// Combined verdict on a candidate module string.
#[derive(Debug, Clone)]
pub enum CandidateVerdict {
    /// Not parseable as JSON at all.
    SyntaxError(String),
    /// Parseable, but violates the restricted grammar.
    StructureErrors(ValidationReport),
    /// Syntactically and structurally valid.
    Valid,
}

/// Run the syntax check, then the structural check, on one candidate.
pub fn validate_candidate(input: &str, profile: &DiseaseProfile) -> CandidateVerdict {
    let validation = check_syntax(input);
    if !validation.valid {
        return CandidateVerdict::SyntaxError(
            validation.reason.unwrap_or_else(|| "unparseable input".to_string()),
        );
    }
    // check_syntax already proved this parses
    let value: Value = match serde_json::from_str(input) {
        Ok(v) => v,
        Err(e) => return CandidateVerdict::SyntaxError(e.to_string()),
    };
    let report = check_structure(&value, profile);
    if report.is_valid() {
        CandidateVerdict::Valid
    } else {
        CandidateVerdict::StructureErrors(report)
    }
}

/// Verify every invariant of the restricted module grammar against a parsed
/// candidate. Collects all violations rather than stopping at the first.
pub fn check_structure(value: &Value, profile: &DiseaseProfile) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(root) = value.as_object() else {
        report.push("root", "module must be a JSON object");
        return report;
    };

    match root.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => {}
        _ => report.push("root", "missing or empty \"name\" string"),
    }

    match root.get("gmf_version").and_then(Value::as_u64) {
        Some(v) if v == GMF_VERSION => {}
        Some(v) => report.push("root", format!("\"gmf_version\" must be {GMF_VERSION}, found {v}")),
        None => report.push("root", format!("missing \"gmf_version\" (must be {GMF_VERSION})")),
    }

    if let Some(remarks) = root.get("remarks") {
        if !remarks.is_array() {
            report.push("root", "\"remarks\" must be an array of strings");
        }
    } else {
        report.push("root", "missing \"remarks\" array");
    }

    let Some(states) = root.get("states").and_then(Value::as_object) else {
        report.push("root", "missing \"states\" object");
        return report;
    };
    if states.is_empty() {
        report.push("states", "must contain at least one state");
        return report;
    }

    let state_names: HashSet<&str> = states.keys().map(String::as_str).collect();
    let mut initial_count = 0usize;
    let mut terminal_states: Vec<&str> = Vec::new();
    // name -> transition target, for the reachability pass
    let mut transitions: HashMap<&str, &str> = HashMap::new();

    for (name, state) in states {
        let Some(state) = state.as_object() else {
            report.push(name.clone(), "state must be a JSON object");
            continue;
        };

        let state_type = match state.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None => {
                report.push(name.clone(), "missing \"type\" field");
                continue;
            }
        };

        if !ALLOWED_STATE_TYPES.contains(&state_type) {
            report.push(
                name.clone(),
                format!("state type \"{state_type}\" is outside the allowed set"),
            );
            continue;
        }

        for forbidden in FORBIDDEN_TRANSITIONS {
            if state.contains_key(forbidden) {
                report.push(
                    name.clone(),
                    format!("\"{forbidden}\" is not allowed; only \"direct_transition\" is"),
                );
            }
        }

        match state_type {
            "Initial" => initial_count += 1,
            "Terminal" => terminal_states.push(name),
            _ => {}
        }

        if state_type == "Terminal" {
            if state.contains_key("direct_transition") {
                report.push(name.clone(), "Terminal state must not have a transition");
            }
            continue;
        }

        match state.get("direct_transition").and_then(Value::as_str) {
            Some(target) => {
                if state_names.contains(target) {
                    transitions.insert(name.as_str(), target);
                } else {
                    report.push(
                        name.clone(),
                        format!("\"direct_transition\" names unknown state \"{target}\""),
                    );
                }
            }
            None => report.push(
                name.clone(),
                "non-terminal state must have exactly one \"direct_transition\"",
            ),
        }

        check_code_provenance(name, state, profile, &mut report);
    }

    if initial_count != 1 {
        report.push(
            "states",
            format!("exactly one \"Initial\" state required, found {initial_count}"),
        );
    }
    if terminal_states.is_empty() {
        report.push("states", "at least one \"Terminal\" state required");
    }

    check_reachability(&state_names, &terminal_states, &transitions, &mut report);

    // Shape details the raw pass does not cover (e.g. codes entries that are
    // not objects, a Guard without an allow condition) surface through the
    // typed model. Only consulted when the raw pass found nothing, so defect
    // lists stay non-redundant.
    if report.is_valid() {
        if let Err(e) = serde_json::from_value::<Module>(value.clone()) {
            report.push("root", format!("module shape invalid: {e}"));
        }
    }

    report
}

/// Every referenced code must appear verbatim in the profile or be one of
/// the fixed placeholders. Realistic-looking invented codes are rejected.
fn check_code_provenance(
    state_name: &str,
    state: &serde_json::Map<String, Value>,
    profile: &DiseaseProfile,
    report: &mut ValidationReport,
) {
    let mut check = |code_value: &Value| {
        let Some(code) = code_value.get("code").and_then(Value::as_str) else {
            report.push(state_name, "code entry missing \"code\" string");
            return;
        };
        // RxNorm shares the "999999" placeholder with SNOMED-CT
        let placeholder = code == PLACEHOLDER_SNOMED || code == PLACEHOLDER_LOINC;
        if !placeholder && !profile.contains_code(code) {
            report.push(
                state_name,
                format!(
                    "code \"{code}\" does not appear in the disease profile; \
                     use a placeholder code instead"
                ),
            );
        }
    };

    if let Some(codes) = state.get("codes").and_then(Value::as_array) {
        for code in codes {
            check(code);
        }
    }
    if let Some(value_code) = state.get("value_code") {
        check(value_code);
    }
}

/// Every non-terminal state must lie on some path to a Terminal state.
/// Walks the transition graph backwards from the terminals.
fn check_reachability(
    state_names: &HashSet<&str>,
    terminal_states: &[&str],
    transitions: &HashMap<&str, &str>,
    report: &mut ValidationReport,
) {
    if terminal_states.is_empty() {
        return; // already reported
    }

    let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in transitions {
        predecessors.entry(to).or_default().push(from);
    }

    let mut reaches_terminal: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = terminal_states.iter().copied().collect();
    while let Some(name) = queue.pop_front() {
        if !reaches_terminal.insert(name) {
            continue;
        }
        if let Some(preds) = predecessors.get(name) {
            queue.extend(preds.iter().copied());
        }
    }

    let mut unreachable: Vec<&str> = state_names
        .iter()
        .filter(|name| !reaches_terminal.contains(**name))
        .copied()
        .collect();
    unreachable.sort_unstable();
    for name in unreachable {
        report.push(name, "no path to a Terminal state");
    }
}
