//! ClinicalTrials.gov v2 API access with flat memo caches.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Value as JsonValue, json};

use super::get_with_retry;

const CT_BASE_URL: &str = "https://clinicaltrials.gov/api/v2/studies";

/// Search ClinicalTrials.gov for studies matching a condition.
pub async fn search(
    http: &reqwest::Client,
    cache: &Mutex<HashMap<String, JsonValue>>,
    condition: &str,
    max_results: u32,
) -> JsonValue {
    let condition = condition.trim();
    if condition.is_empty() {
        return json!({"query": condition, "count": 0, "results": [], "error": "Empty condition."});
    }

    let cache_key = format!("{condition}::{max_results}");
    if let Some(cached) = cache.lock().expect("cache poisoned").get(&cache_key) {
        return cached.clone();
    }

    let params = [
        ("query.term", condition.to_string()),
        ("pageSize", max_results.to_string()),
    ];

    let result = match get_with_retry(http, CT_BASE_URL, &params).await {
        Ok(body) => match serde_json::from_str::<JsonValue>(&body) {
            Ok(data) => {
                let studies: Vec<JsonValue> = data["studies"]
                    .as_array()
                    .map(|list| list.iter().map(summarize_study).collect())
                    .unwrap_or_default();
                json!({
                    "query": condition,
                    "count": studies.len(),
                    "results": studies,
                    "error": null,
                })
            }
            Err(e) => json!({
                "query": condition,
                "count": 0,
                "results": [],
                "error": format!("Unexpected search response: {e}"),
            }),
        },
        Err(e) => json!({"query": condition, "count": 0, "results": [], "error": e}),
    };

    cache
        .lock()
        .expect("cache poisoned")
        .insert(cache_key, result.clone());
    result
}

/// Reduce one protocolSection record to the metadata the agent needs.
fn summarize_study(study: &JsonValue) -> JsonValue {
    let protocol = &study["protocolSection"];
    let ident = &protocol["identificationModule"];
    let status = &protocol["statusModule"];
    let design = &protocol["designModule"];
    let nct_id = ident["nctId"].as_str().unwrap_or("");

    json!({
        "nct_id": nct_id,
        "brief_title": ident["briefTitle"],
        "official_title": ident["officialTitle"],
        "overall_status": status["overallStatus"],
        "conditions": protocol["conditionsModule"]["conditions"],
        "phases": design["phases"],
        "study_type": design["studyType"],
        "start_date": status["startDateStruct"]["date"],
        "completion_date": status["completionDateStruct"]["date"],
        "url": if nct_id.is_empty() {
            JsonValue::Null
        } else {
            json!(format!("https://clinicaltrials.gov/study/{nct_id}"))
        },
    })
}

/// Fetch rich content for one study: descriptions, eligibility, design,
/// arms and interventions, outcomes and locations.
pub async fn full_content(
    http: &reqwest::Client,
    cache: &Mutex<HashMap<String, JsonValue>>,
    nct_id: &str,
) -> JsonValue {
    let nct_id = nct_id.trim();
    if nct_id.is_empty() {
        return json!({"nct_id": nct_id, "error": "Empty NCT ID."});
    }

    if let Some(cached) = cache.lock().expect("cache poisoned").get(nct_id) {
        return cached.clone();
    }

    let url = format!("{CT_BASE_URL}/{nct_id}");
    let result = match get_with_retry(http, &url, &[]).await {
        Ok(body) => match serde_json::from_str::<JsonValue>(&body) {
            Ok(data) => flatten_full_study(nct_id, &data),
            Err(e) => json!({
                "nct_id": nct_id,
                "error": format!("Unexpected study response: {e}"),
            }),
        },
        Err(e) => json!({"nct_id": nct_id, "error": e}),
    };

    cache
        .lock()
        .expect("cache poisoned")
        .insert(nct_id.to_string(), result.clone());
    result
}

fn flatten_full_study(nct_id: &str, data: &JsonValue) -> JsonValue {
    let protocol = &data["protocolSection"];
    let ident = &protocol["identificationModule"];
    let status = &protocol["statusModule"];
    let description = &protocol["descriptionModule"];
    let eligibility = &protocol["eligibilityModule"];
    let design = &protocol["designModule"];
    let arms = &protocol["armsInterventionsModule"];
    let outcomes = &protocol["outcomesModule"];

    json!({
        "nct_id": nct_id,
        "brief_title": ident["briefTitle"],
        "official_title": ident["officialTitle"],
        "overall_status": status["overallStatus"],
        "start_date": status["startDateStruct"]["date"],
        "completion_date": status["completionDateStruct"]["date"],
        "conditions": protocol["conditionsModule"]["conditions"],
        "brief_summary": description["briefSummary"],
        "detailed_description": description["detailedDescription"],
        "eligibility_criteria": eligibility["eligibilityCriteria"],
        "healthy_volunteers": eligibility["healthyVolunteers"],
        "sex": eligibility["sex"],
        "minimum_age": eligibility["minimumAge"],
        "maximum_age": eligibility["maximumAge"],
        "study_type": design["studyType"],
        "phases": design["phases"],
        "allocation": design["allocation"],
        "intervention_model": design["interventionModel"],
        "masking": design["masking"],
        "primary_purpose": design["primaryPurpose"],
        "arm_groups": arms["armGroups"],
        "interventions": arms["interventions"],
        "primary_outcomes": outcomes["primaryOutcomes"],
        "secondary_outcomes": outcomes["secondaryOutcomes"],
        "other_outcomes": outcomes["otherOutcomes"],
        "locations": protocol["contactsLocationsModule"]["locations"],
        "url": format!("https://clinicaltrials.gov/study/{nct_id}"),
        "error": null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_study() -> JsonValue {
        json!({
            "protocolSection": {
                "identificationModule": {
                    "nctId": "NCT01234567",
                    "briefTitle": "A Trial of Drug X in Asthma",
                    "officialTitle": "Phase 3 Study of Drug X"
                },
                "statusModule": {
                    "overallStatus": "COMPLETED",
                    "startDateStruct": {"date": "2019-01"},
                    "completionDateStruct": {"date": "2021-06"}
                },
                "conditionsModule": {"conditions": ["Asthma"]},
                "designModule": {
                    "studyType": "INTERVENTIONAL",
                    "phases": ["PHASE3"]
                },
                "descriptionModule": {
                    "briefSummary": "Evaluates drug X.",
                    "detailedDescription": "Long description."
                },
                "eligibilityModule": {
                    "eligibilityCriteria": "Adults 18-65",
                    "sex": "ALL",
                    "minimumAge": "18 Years",
                    "maximumAge": "65 Years"
                }
            }
        })
    }

    #[test]
    fn summarizes_search_hit() {
        let summary = summarize_study(&sample_study());
        assert_eq!(summary["nct_id"], "NCT01234567");
        assert_eq!(summary["overall_status"], "COMPLETED");
        assert_eq!(summary["phases"][0], "PHASE3");
        assert_eq!(
            summary["url"],
            "https://clinicaltrials.gov/study/NCT01234567"
        );
    }

    #[test]
    fn summarize_tolerates_missing_modules() {
        let summary = summarize_study(&json!({}));
        assert_eq!(summary["nct_id"], "");
        assert_eq!(summary["url"], JsonValue::Null);
        assert_eq!(summary["overall_status"], JsonValue::Null);
    }

    #[test]
    fn flattens_full_study() {
        let full = flatten_full_study("NCT01234567", &sample_study());
        assert_eq!(full["brief_summary"], "Evaluates drug X.");
        assert_eq!(full["eligibility_criteria"], "Adults 18-65");
        assert_eq!(full["minimum_age"], "18 Years");
        assert_eq!(full["error"], JsonValue::Null);
    }

    #[tokio::test]
    async fn empty_nct_id_is_an_error_payload() {
        let http = reqwest::Client::new();
        let cache = Mutex::new(HashMap::new());
        let result = full_content(&http, &cache, "  ").await;
        assert_eq!(result["error"], "Empty NCT ID.");
    }
}
