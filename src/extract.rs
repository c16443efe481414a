//! Per-[`crate::model::RunType`] extraction: turns one fetched page's body
//! into candidate job records. Each extractor is pure — it never touches
//! the store or network, so it is trivially unit-testable.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use scraper::{Html, Selector};
use serde_json::Value;

/// One candidate job pulled out of a page, prior to dedup/checksum.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: String,
    pub url: String,
    pub salary_text: Option<String>,
    pub job_type_text: Option<String>,
    pub posted_date_text: Option<String>,
    pub raw_data: Value,
}

/// Parses an RSS/Atom `<item>`/`<entry>` feed into candidates. Unknown
/// elements are ignored rather than treated as an error — feeds vary.
pub fn extract_rss(body: &str) -> Vec<Candidate> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut current: Option<Candidate> = None;
    let mut field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref());
                match name.as_str() {
                    "item" | "entry" => current = Some(Candidate::default()),
                    "title" | "description" | "summary" | "link" | "pubdate" | "pubDate"
                    | "company" | "location" | "salary" => field = Some(name),
                    _ => field = None,
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(candidate), Some(field_name)) = (current.as_mut(), field.as_deref()) {
                    let text = e.unescape().unwrap_or_default().into_owned();
                    apply_field(candidate, field_name, text);
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref());
                if matches!(name.as_str(), "item" | "entry") {
                    if let Some(candidate) = current.take() {
                        candidates.push(candidate);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    candidates
}

fn local_name(qname: &&[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_lowercase()
}

fn apply_field(candidate: &mut Candidate, field: &str, text: String) {
    match field {
        "title" => candidate.title = text,
        "description" | "summary" => candidate.description = text,
        "link" => candidate.url = text,
        "pubdate" => candidate.posted_date_text = Some(text),
        "company" => candidate.company = text,
        "location" => candidate.location = Some(text),
        "salary" => candidate.salary_text = Some(text),
        _ => {}
    }
}

/// Selector map keys understood by [`extract_html`]; any missing key is
/// simply skipped for every listing node.
pub const HTML_FIELD_KEYS: &[&str] = &[
    "listing", "title", "company", "location", "description", "url", "salary", "job_type", "posted_date",
];

/// Applies a board's configured CSS selectors against one HTML page. The
/// `listing` selector finds each posting node; the rest are evaluated
/// relative to it. `url` is read from the node's `href` attribute if the
/// selector resolves to an anchor, else its text.
pub fn extract_html(body: &str, selectors: &HashMap<String, String>, base_url: &str) -> Vec<Candidate> {
    let Some(listing_selector) = selectors.get("listing").and_then(|s| Selector::parse(s).ok()) else {
        return Vec::new();
    };
    let document = Html::parse_document(body);

    document
        .select(&listing_selector)
        .map(|node| {
            let mut candidate = Candidate::default();
            for key in HTML_FIELD_KEYS.iter().filter(|k| **k != "listing") {
                let Some(sel) = selectors.get(*key).and_then(|s| Selector::parse(s).ok()) else {
                    continue;
                };
                let Some(matched) = node.select(&sel).next() else {
                    continue;
                };
                let text = matched.text().collect::<Vec<_>>().join(" ").trim().to_string();
                let value = if *key == "url" {
                    matched
                        .value()
                        .attr("href")
                        .map(|href| resolve_url(base_url, href))
                        .unwrap_or(text)
                } else {
                    text
                };
                set_html_field(&mut candidate, key, value);
            }
            candidate
        })
        .filter(|c| !c.title.is_empty())
        .collect()
}

fn set_html_field(candidate: &mut Candidate, key: &str, value: String) {
    match key {
        "title" => candidate.title = value,
        "company" => candidate.company = value,
        "location" => candidate.location = Some(value),
        "description" => candidate.description = value,
        "url" => candidate.url = value,
        "salary" => candidate.salary_text = Some(value),
        "job_type" => candidate.job_type_text = Some(value),
        "posted_date" => candidate.posted_date_text = Some(value),
        _ => {}
    }
}

fn resolve_url(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Parses a board-specific JSON API response. Expects either a top-level
/// array or an object with a `results`/`items`/`jobs` array field;
/// individual job objects are mapped by a small set of common key names.
pub fn extract_json(body: &[u8]) -> Vec<Candidate> {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return Vec::new();
    };
    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(ref map) => ["results", "items", "jobs", "data"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| Candidate {
            title: string_field(&item, &["title", "job_title", "name"]),
            company: string_field(&item, &["company", "company_name", "employer"]),
            location: optional_string_field(&item, &["location", "job_location"]),
            description: string_field(&item, &["description", "job_description", "body"]),
            url: string_field(&item, &["url", "job_url", "apply_url", "link"]),
            salary_text: optional_string_field(&item, &["salary", "salary_range", "compensation"]),
            job_type_text: optional_string_field(&item, &["job_type", "type", "employment_type"]),
            posted_date_text: optional_string_field(&item, &["posted_date", "date_posted", "created_at"]),
            raw_data: item,
        })
        .filter(|c| !c.title.is_empty())
        .collect()
}

fn string_field(value: &Value, keys: &[&str]) -> String {
    optional_string_field(value, keys).unwrap_or_default()
}

fn optional_string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_extracts_items() {
        let body = r#"<rss><channel>
            <item><title>Engineer</title><description>Build things</description><link>http://x/1</link></item>
            <item><title>Designer</title><description>Make things pretty</description><link>http://x/2</link></item>
        </channel></rss>"#;
        let candidates = extract_rss(body);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Engineer");
        assert_eq!(candidates[1].url, "http://x/2");
    }

    #[test]
    fn html_extracts_via_selectors() {
        let body = r#"<html><body>
            <div class="job"><a class="t" href="/jobs/1">Engineer</a><span class="c">Acme</span></div>
            <div class="job"><a class="t" href="/jobs/2">Designer</a><span class="c">Beta</span></div>
        </body></html>"#;
        let mut selectors = HashMap::new();
        selectors.insert("listing".to_string(), "div.job".to_string());
        selectors.insert("title".to_string(), "a.t".to_string());
        selectors.insert("company".to_string(), "span.c".to_string());
        selectors.insert("url".to_string(), "a.t".to_string());

        let candidates = extract_html(body, &selectors, "http://boards.example.com/list");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Engineer");
        assert_eq!(candidates[0].url, "http://boards.example.com/jobs/1");
        assert_eq!(candidates[1].company, "Beta");
    }

    #[test]
    fn json_extracts_from_results_array() {
        let body = br#"{"results": [{"title": "Engineer", "company": "Acme", "url": "http://x/1"}]}"#;
        let candidates = extract_json(body);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].company, "Acme");
    }

    #[test]
    fn json_missing_title_is_dropped() {
        let body = br#"[{"company": "Acme"}]"#;
        assert!(extract_json(body).is_empty());
    }
}
