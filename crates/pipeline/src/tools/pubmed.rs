//! PubMed / PubMed Central access via the NCBI E-utilities.
//!
//! Search uses the JSON esearch/esummary endpoints; full-text retrieval
//! maps PMID to PMCID with elink and pulls the article body from the PMC
//! efetch XML. Metadata (title, journal, date, abstract) comes from the
//! PubMed efetch XML.

use serde_json::{Value as JsonValue, json};

use super::get_with_retry;

const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

fn base_params(api_key: Option<&str>) -> Vec<(&'static str, String)> {
    match api_key {
        Some(key) => vec![("api_key", key.to_string())],
        None => Vec::new(),
    }
}

/// Search PubMed and return article metadata records.
pub async fn search(
    http: &reqwest::Client,
    api_key: Option<&str>,
    term: &str,
    max_results: u32,
) -> JsonValue {
    let term = term.trim();
    if term.is_empty() {
        return json!({"query": term, "results": [], "error": "Empty search term."});
    }

    let mut params = base_params(api_key);
    params.push(("db", "pubmed".to_string()));
    params.push(("term", term.to_string()));
    params.push(("retmode", "json".to_string()));
    params.push(("retmax", max_results.to_string()));

    let body = match get_with_retry(http, &format!("{BASE_URL}/esearch.fcgi"), &params).await {
        Ok(body) => body,
        Err(e) => return json!({"query": term, "results": [], "error": e}),
    };
    let search: JsonValue = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return json!({
                "query": term,
                "results": [],
                "error": format!("Unexpected esearch response: {e}")
            });
        }
    };

    let pmids: Vec<String> = search["esearchresult"]["idlist"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if pmids.is_empty() {
        return json!({"query": term, "results": [], "error": null});
    }

    let mut params = base_params(api_key);
    params.push(("db", "pubmed".to_string()));
    params.push(("id", pmids.join(",")));
    params.push(("retmode", "json".to_string()));

    let body = match get_with_retry(http, &format!("{BASE_URL}/esummary.fcgi"), &params).await {
        Ok(body) => body,
        Err(e) => return json!({"query": term, "results": [], "error": e}),
    };
    let summary: JsonValue = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return json!({
                "query": term,
                "results": [],
                "error": format!("Unexpected esummary response: {e}")
            });
        }
    };

    json!({
        "query": term,
        "results": parse_summaries(&summary),
        "error": null,
    })
}

/// Flatten an esummary response into per-article metadata records.
fn parse_summaries(summary: &JsonValue) -> Vec<JsonValue> {
    let result = &summary["result"];
    let Some(uids) = result["uids"].as_array() else {
        return Vec::new();
    };

    uids.iter()
        .filter_map(JsonValue::as_str)
        .map(|uid| {
            let info = &result[uid];
            json!({
                "pmid": uid,
                "title": info["title"].as_str().unwrap_or(""),
                "journal": info["fulljournalname"].as_str().unwrap_or(""),
                "pubdate": info["pubdate"].as_str().unwrap_or(""),
                "pub_url": format!("https://pubmed.ncbi.nlm.nih.gov/{uid}/"),
            })
        })
        .collect()
}

/// Fetch full content for a PubMed article via PMC, when available.
pub async fn fulltext_from_pmc(
    http: &reqwest::Client,
    api_key: Option<&str>,
    pmid: &str,
) -> JsonValue {
    let pmid = pmid.trim();
    if pmid.is_empty() {
        return json!({"pmid": pmid, "error": "Empty PMID."});
    }

    // 1) map PMID -> PMCID
    let mut params = base_params(api_key);
    params.push(("dbfrom", "pubmed".to_string()));
    params.push(("db", "pmc".to_string()));
    params.push(("id", pmid.to_string()));
    params.push(("retmode", "json".to_string()));

    let pmcid = match get_with_retry(http, &format!("{BASE_URL}/elink.fcgi"), &params).await {
        Ok(body) => serde_json::from_str::<JsonValue>(&body)
            .ok()
            .as_ref()
            .and_then(parse_elink_pmcid),
        Err(e) => return json!({"pmid": pmid, "error": e}),
    };

    // 2) article metadata from PubMed efetch XML
    let mut params = base_params(api_key);
    params.push(("db", "pubmed".to_string()));
    params.push(("id", pmid.to_string()));
    params.push(("retmode", "xml".to_string()));

    let meta = match get_with_retry(http, &format!("{BASE_URL}/efetch.fcgi"), &params).await {
        Ok(body) => parse_article_metadata(&body),
        Err(e) => return json!({"pmid": pmid, "error": e}),
    };

    let pubmed_url = format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/");

    let Some(pmcid) = pmcid else {
        return json!({
            "pmid": pmid,
            "pmcid": null,
            "has_fulltext": false,
            "title": meta.title,
            "journal": meta.journal,
            "pubdate": meta.pubdate,
            "abstract": meta.abstract_text,
            "fulltext": "",
            "pubmed_url": pubmed_url,
            "pmc_url": null,
            "message": "No PMC full-text link found for this PMID.",
            "error": null,
        });
    };

    // 3) full text from the PMC efetch XML body
    let mut params = base_params(api_key);
    params.push(("db", "pmc".to_string()));
    params.push(("id", pmcid.clone()));
    params.push(("retmode", "xml".to_string()));

    let fulltext = match get_with_retry(http, &format!("{BASE_URL}/efetch.fcgi"), &params).await {
        Ok(body) => parse_pmc_body(&body),
        Err(e) => return json!({"pmid": pmid, "pmcid": pmcid, "error": e}),
    };

    let message = if fulltext.is_empty() {
        "PMC record found but fulltext body is empty."
    } else {
        ""
    };

    json!({
        "pmid": pmid,
        "pmcid": pmcid,
        "has_fulltext": !fulltext.is_empty(),
        "title": meta.title,
        "journal": meta.journal,
        "pubdate": meta.pubdate,
        "abstract": meta.abstract_text,
        "fulltext": fulltext,
        "pubmed_url": pubmed_url,
        "pmc_url": format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/"),
        "message": message,
        "error": null,
    })
}

/// Pull the first linked PMC id out of an elink JSON response.
fn parse_elink_pmcid(elink: &JsonValue) -> Option<String> {
    let linksets = elink["linksets"].as_array()?;
    for linkset in linksets {
        let Some(dbs) = linkset["linksetdbs"].as_array() else {
            continue;
        };
        for db in dbs {
            if let Some(links) = db["links"].as_array() {
                for link in links {
                    let id = match link {
                        JsonValue::String(s) => s.clone(),
                        JsonValue::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    if !id.is_empty() {
                        return Some(if id.starts_with("PMC") {
                            id
                        } else {
                            format!("PMC{id}")
                        });
                    }
                }
            }
        }
    }
    None
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ArticleMetadata {
    title: String,
    journal: String,
    pubdate: String,
    abstract_text: String,
}

fn node_text(node: roxmltree::Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extract title, journal, pubdate and abstract from a PubMed efetch XML
/// document. Missing elements become empty strings.
fn parse_article_metadata(xml: &str) -> ArticleMetadata {
    let Ok(doc) = roxmltree::Document::parse(xml) else {
        return ArticleMetadata::default();
    };

    let title = doc
        .descendants()
        .find(|n| n.has_tag_name("ArticleTitle"))
        .map(node_text)
        .unwrap_or_default();

    let journal = doc
        .descendants()
        .find(|n| n.has_tag_name("Journal"))
        .and_then(|j| j.descendants().find(|n| n.has_tag_name("Title")))
        .map(node_text)
        .unwrap_or_default();

    let pubdate = doc
        .descendants()
        .find(|n| n.has_tag_name("PubDate"))
        .map(|d| {
            ["Year", "Month", "Day"]
                .iter()
                .filter_map(|tag| {
                    d.children()
                        .find(|n| n.has_tag_name(*tag))
                        .map(node_text)
                })
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let abstract_parts: Vec<String> = doc
        .descendants()
        .filter(|n| n.has_tag_name("AbstractText"))
        .map(|n| {
            let text = node_text(n);
            match n.attribute("Label") {
                Some(label) if !text.is_empty() => format!("{label}: {text}"),
                _ => text,
            }
        })
        .filter(|part| !part.is_empty())
        .collect();

    ArticleMetadata {
        title,
        journal,
        pubdate,
        abstract_text: abstract_parts.join("\n\n"),
    }
}

/// Extract readable paragraphs from a PMC efetch XML body element.
fn parse_pmc_body(xml: &str) -> String {
    let Ok(doc) = roxmltree::Document::parse(xml) else {
        return String::new();
    };
    let Some(body) = doc.descendants().find(|n| n.has_tag_name("body")) else {
        return String::new();
    };

    let paragraphs: Vec<String> = body
        .descendants()
        .filter(|n| n.has_tag_name("p"))
        .map(node_text)
        .filter(|text| !text.is_empty())
        .collect();

    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_esummary_records() {
        let summary = serde_json::json!({
            "result": {
                "uids": ["12345", "67890"],
                "12345": {
                    "title": "Asthma epidemiology",
                    "fulljournalname": "Journal of Respiratory Medicine",
                    "pubdate": "2023 Jan"
                },
                "67890": {
                    "title": "Asthma treatment outcomes",
                    "fulljournalname": "Thorax",
                    "pubdate": "2022"
                }
            }
        });
        let records = parse_summaries(&summary);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["pmid"], "12345");
        assert_eq!(records[0]["title"], "Asthma epidemiology");
        assert_eq!(
            records[1]["pub_url"],
            "https://pubmed.ncbi.nlm.nih.gov/67890/"
        );
    }

    #[test]
    fn parses_elink_pmcid_with_and_without_prefix() {
        let elink = serde_json::json!({
            "linksets": [{
                "linksetdbs": [{"dbto": "pmc", "links": ["7654321"]}]
            }]
        });
        assert_eq!(parse_elink_pmcid(&elink), Some("PMC7654321".to_string()));

        let none = serde_json::json!({"linksets": [{}]});
        assert_eq!(parse_elink_pmcid(&none), None);
    }

    #[test]
    fn parses_article_metadata_from_efetch_xml() {
        let xml = r#"<PubmedArticleSet>
            <PubmedArticle><MedlineCitation><Article>
                <Journal><Title>Thorax</Title>
                    <JournalIssue><PubDate><Year>2023</Year><Month>Mar</Month></PubDate></JournalIssue>
                </Journal>
                <ArticleTitle>Asthma prevalence in adults</ArticleTitle>
                <Abstract>
                    <AbstractText Label="BACKGROUND">Asthma is common.</AbstractText>
                    <AbstractText>Prevalence was 8%.</AbstractText>
                </Abstract>
            </Article></MedlineCitation></PubmedArticle>
        </PubmedArticleSet>"#;
        let meta = parse_article_metadata(xml);
        assert_eq!(meta.title, "Asthma prevalence in adults");
        assert_eq!(meta.journal, "Thorax");
        assert_eq!(meta.pubdate, "2023 Mar");
        assert!(meta.abstract_text.contains("BACKGROUND: Asthma is common."));
        assert!(meta.abstract_text.contains("Prevalence was 8%."));
    }

    #[test]
    fn empty_metadata_for_unparseable_xml() {
        assert_eq!(parse_article_metadata("not xml"), ArticleMetadata::default());
    }

    #[test]
    fn extracts_pmc_paragraphs() {
        let xml = r#"<article><body>
            <sec><title>Methods</title><p>We studied 100 patients.</p></sec>
            <sec><p>Response rate was 60%.</p></sec>
        </body></article>"#;
        let text = parse_pmc_body(xml);
        assert!(text.contains("We studied 100 patients."));
        assert!(text.contains("Response rate was 60%."));
    }

    #[test]
    fn missing_body_yields_empty_fulltext() {
        assert_eq!(parse_pmc_body("<article></article>"), "");
    }
}
