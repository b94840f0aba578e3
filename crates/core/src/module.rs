//! Typed model of the restricted GMF module grammar.
//!
//! Only the "safe mode" subset is representable: ten state kinds, a single
//! deterministic `direct_transition` per non-terminal state, and qualitative
//! observation results via `value_code`. Numeric quantity features (`exact`,
//! `range`, `unit` on values) are intentionally absent from the model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GmfError;

/// The fixed GMF version marker every module carries.
pub const GMF_VERSION: u64 = 2;

/// Placeholder code used when the disease profile supplies no SNOMED-CT code.
pub const PLACEHOLDER_SNOMED: &str = "999999";
/// Placeholder code used when the disease profile supplies no RxNorm code.
pub const PLACEHOLDER_RXNORM: &str = "999999";
/// Placeholder code used when the disease profile supplies no LOINC code.
pub const PLACEHOLDER_LOINC: &str = "99999-9";

/// The ten state kinds the restricted grammar allows.
pub const ALLOWED_STATE_TYPES: [&str; 10] = [
    "Initial",
    "Terminal",
    "Guard",
    "Encounter",
    "EncounterEnd",
    "ConditionOnset",
    "MedicationOrder",
    "Procedure",
    "Observation",
    "Death",
];

/// Transition kinds outside the restricted grammar. Their presence anywhere
/// in a state definition is a structural defect.
pub const FORBIDDEN_TRANSITIONS: [&str; 5] = [
    "distributed_transition",
    "conditional_transition",
    "complex_transition",
    "lookup_table_transition",
    "type_of_care_transition",
];

/// A terminology code reference (SNOMED-CT, RxNorm, LOINC, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub system: String,
    pub code: String,
    pub display: String,
}

impl Code {
    /// Whether this is one of the three fixed, obviously-artificial
    /// placeholder codes.
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self.code.as_str(),
            PLACEHOLDER_SNOMED | PLACEHOLDER_RXNORM | PLACEHOLDER_LOINC
        )
    }
}

/// Guard eligibility condition (the only two supported kinds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "condition_type")]
pub enum Condition {
    Gender {
        gender: String,
    },
    Age {
        operator: String,
        quantity: f64,
        unit: String,
    },
}

/// A state definition, tagged by its `type` field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum State {
    Initial {
        direct_transition: String,
    },
    Terminal {},
    Guard {
        allow: Condition,
        direct_transition: String,
    },
    Encounter {
        #[serde(skip_serializing_if = "Option::is_none")]
        wellness: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encounter_class: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        codes: Option<Vec<Code>>,
        direct_transition: String,
    },
    EncounterEnd {
        direct_transition: String,
    },
    ConditionOnset {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_encounter: Option<String>,
        codes: Vec<Code>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assign_to_attribute: Option<String>,
        direct_transition: String,
    },
    MedicationOrder {
        codes: Vec<Code>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        direct_transition: String,
    },
    Procedure {
        codes: Vec<Code>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        direct_transition: String,
    },
    Observation {
        category: String,
        codes: Vec<Code>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value_code: Option<Code>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        direct_transition: String,
    },
    Death {
        direct_transition: String,
    },
}

impl State {
    /// The state's deterministic transition target, if it has one.
    pub fn direct_transition(&self) -> Option<&str> {
        match self {
            State::Terminal {} => None,
            State::Initial { direct_transition }
            | State::Guard {
                direct_transition, ..
            }
            | State::Encounter {
                direct_transition, ..
            }
            | State::EncounterEnd { direct_transition }
            | State::ConditionOnset {
                direct_transition, ..
            }
            | State::MedicationOrder {
                direct_transition, ..
            }
            | State::Procedure {
                direct_transition, ..
            }
            | State::Observation {
                direct_transition, ..
            }
            | State::Death { direct_transition } => Some(direct_transition),
        }
    }

    /// All terminology codes referenced by this state.
    pub fn codes(&self) -> Vec<&Code> {
        let mut out = Vec::new();
        match self {
            State::Encounter { codes, .. } => {
                if let Some(codes) = codes {
                    out.extend(codes.iter());
                }
            }
            State::ConditionOnset { codes, .. }
            | State::MedicationOrder { codes, .. }
            | State::Procedure { codes, .. } => out.extend(codes.iter()),
            State::Observation {
                codes, value_code, ..
            } => {
                out.extend(codes.iter());
                if let Some(vc) = value_code {
                    out.push(vc);
                }
            }
            _ => {}
        }
        out
    }
}

/// A GMF simulation module (restricted subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub gmf_version: u64,
    #[serde(default)]
    pub remarks: Vec<String>,
    pub states: BTreeMap<String, State>,
}

impl Module {
    /// Parse a JSON string into a typed module.
    ///
    /// This distinguishes syntax failures from structural ones so the
    /// repair loop can report the right defect class.
    pub fn parse(input: &str) -> Result<Self, GmfError> {
        let value: serde_json::Value =
            serde_json::from_str(input).map_err(|e| GmfError::Syntax(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| GmfError::Structure(e.to_string()))
    }

    /// Serialize to a minified JSON string.
    pub fn to_json(&self) -> Result<String, GmfError> {
        serde_json::to_string(self).map_err(|e| GmfError::Structure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_module() -> Module {
        let mut states = BTreeMap::new();
        states.insert(
            "Initial".to_string(),
            State::Initial {
                direct_transition: "Terminal".to_string(),
            },
        );
        states.insert("Terminal".to_string(), State::Terminal {});
        Module {
            name: "Test_Module".to_string(),
            gmf_version: GMF_VERSION,
            remarks: vec!["test".to_string()],
            states,
        }
    }

    #[test]
    fn roundtrips_minimal_module() {
        let module = minimal_module();
        let json = module.to_json().unwrap();
        let parsed = Module::parse(&json).unwrap();
        assert_eq!(parsed.name, "Test_Module");
        assert_eq!(parsed.gmf_version, 2);
        assert_eq!(parsed.states.len(), 2);
    }

    #[test]
    fn state_type_tag_is_serialized() {
        let json = minimal_module().to_json().unwrap();
        assert!(json.contains(r#""type":"Initial""#));
        assert!(json.contains(r#""type":"Terminal""#));
    }

    #[test]
    fn unknown_state_type_is_a_structure_error() {
        let input = r#"{
            "name": "X",
            "gmf_version": 2,
            "remarks": [],
            "states": {
                "Initial": {"type": "Initial", "direct_transition": "T"},
                "T": {"type": "Delay", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }
        }"#;
        match Module::parse(input) {
            Err(GmfError::Structure(_)) => {}
            other => panic!("expected structure error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_syntax_error() {
        match Module::parse(r#"{"name": "X",}"#) {
            Err(GmfError::Syntax(_)) => {}
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn placeholder_codes_are_recognized() {
        let code = Code {
            system: "SNOMED-CT".to_string(),
            code: "999999".to_string(),
            display: "Placeholder SNOMED Concept".to_string(),
        };
        assert!(code.is_placeholder());

        let real = Code {
            system: "SNOMED-CT".to_string(),
            code: "260413007".to_string(),
            display: "Negative".to_string(),
        };
        assert!(!real.is_placeholder());
    }

    #[test]
    fn observation_reports_all_codes() {
        let state = State::Observation {
            category: "laboratory".to_string(),
            codes: vec![Code {
                system: "LOINC".to_string(),
                code: PLACEHOLDER_LOINC.to_string(),
                display: "Placeholder Lab Test".to_string(),
            }],
            value_code: Some(Code {
                system: "SNOMED-CT".to_string(),
                code: PLACEHOLDER_SNOMED.to_string(),
                display: "Placeholder Result".to_string(),
            }),
            reason: None,
            direct_transition: "Terminal".to_string(),
        };
        let codes = state.codes();
        assert_eq!(codes.len(), 2);
        assert!(codes.iter().all(|c| c.is_placeholder()));
    }

    #[test]
    fn terminal_has_no_transition() {
        assert_eq!(State::Terminal {}.direct_transition(), None);
        assert_eq!(
            State::Death {
                direct_transition: "Terminal".to_string()
            }
            .direct_transition(),
            Some("Terminal")
        );
    }
}
