//! Normalizer (C5): raw record -> normalized record, with quality
//! scoring. Rule-based by default; [`NormalizerBackend`] is the seam a
//! future ML-assisted implementation plugs into (an Open Question in the
//! originating design: the source references a Gemini-backed parser, but
//! only a rule-based backend is required here).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{JobType, NormalizationMethod, NormalizedJob, RawJob};
use crate::store::DocumentStore;

/// Parsed salary range.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSalary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<String>,
}

/// Parsed location components. The original string is preserved by the
/// caller whenever confidence is low.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLocation {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub confidence: f64,
}

/// Swappable normalization strategy. [`RuleBasedBackend`] is the only
/// required implementation.
pub trait NormalizerBackend: Send + Sync {
    fn parse_salary(&self, text: &str) -> ParsedSalary;
    fn parse_location(&self, text: &str) -> ParsedLocation;
    fn parse_date(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>>;
    fn canonicalize_job_type(&self, text: &str) -> Option<JobType>;
    fn extract_skills(&self, description: &str) -> Vec<String>;
}

const COUNTRIES: &[&str] = &[
    "united states",
    "usa",
    "us",
    "canada",
    "united kingdom",
    "uk",
    "germany",
    "france",
    "india",
    "australia",
    "remote",
];

const SKILL_VOCABULARY: &[&str] = &[
    "rust",
    "python",
    "typescript",
    "javascript",
    "go",
    "golang",
    "java",
    "kubernetes",
    "docker",
    "aws",
    "gcp",
    "azure",
    "postgresql",
    "sql",
    "react",
    "graphql",
    "terraform",
    "ci/cd",
];

/// Default normalization strategy: regex-free, hand-written parsers over
/// the surface forms the original scraper's boards actually emit.
pub struct RuleBasedBackend;

impl NormalizerBackend for RuleBasedBackend {
    fn parse_salary(&self, text: &str) -> ParsedSalary {
        let lower = text.to_lowercase();
        let currency = if lower.contains('$') {
            Some("USD".to_string())
        } else if lower.contains('₹') || lower.contains("lpa") {
            Some("INR".to_string())
        } else if lower.contains('€') {
            Some("EUR".to_string())
        } else if lower.contains('£') {
            Some("GBP".to_string())
        } else {
            None
        };

        let period = if lower.contains("/hr") || lower.contains("hour") {
            Some("hourly".to_string())
        } else if lower.contains("/mo") || lower.contains("month") {
            Some("monthly".to_string())
        } else {
            Some("yearly".to_string())
        };

        let numbers = extract_numbers(&lower);
        let scale = if lower.contains("lpa") { 100_000.0 } else { 1.0 };
        let numbers: Vec<f64> = numbers.into_iter().map(|n| n * scale).collect();

        match numbers.len() {
            0 => ParsedSalary {
                min: None,
                max: None,
                currency,
                period,
            },
            1 => ParsedSalary {
                min: Some(numbers[0]),
                max: Some(numbers[0]),
                currency,
                period,
            },
            _ => ParsedSalary {
                min: numbers.iter().cloned().fold(None, |a, b| {
                    Some(a.map_or(b, |a: f64| a.min(b)))
                }),
                max: numbers.iter().cloned().fold(None, |a, b| {
                    Some(a.map_or(b, |a: f64| a.max(b)))
                }),
                currency,
                period,
            },
        }
    }

    fn parse_location(&self, text: &str) -> ParsedLocation {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ParsedLocation::default();
        }
        let parts: Vec<&str> = trimmed.split(|c| c == ',' || c == '|').map(str::trim).collect();
        let lower_last = parts.last().map(|p| p.to_lowercase()).unwrap_or_default();
        let country = COUNTRIES
            .iter()
            .find(|c| lower_last.contains(*c))
            .map(|c| c.to_string());

        match parts.len() {
            1 => ParsedLocation {
                city: Some(parts[0].to_string()),
                state: None,
                country,
                confidence: 0.4,
            },
            2 => ParsedLocation {
                city: Some(parts[0].to_string()),
                state: Some(parts[1].to_string()),
                country,
                confidence: 0.7,
            },
            _ => ParsedLocation {
                city: Some(parts[0].to_string()),
                state: Some(parts[1].to_string()),
                country: country.or_else(|| parts.get(2).map(|s| s.to_string())),
                confidence: 0.9,
            },
        }
    }

    fn parse_date(&self, text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(dt.with_timezone(&Utc));
        }
        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_suffix("days ago").or_else(|| lower.strip_suffix("day ago")) {
            if let Ok(n) = rest.trim().parse::<i64>() {
                return Some(reference - chrono::Duration::days(n));
            }
        }
        if lower.contains("today") {
            return Some(reference);
        }
        if lower.contains("yesterday") {
            return Some(reference - chrono::Duration::days(1));
        }
        None
    }

    fn canonicalize_job_type(&self, text: &str) -> Option<JobType> {
        let lower = text.to_lowercase();
        if lower.contains("intern") {
            Some(JobType::Internship)
        } else if lower.contains("contract") || lower.contains("freelance") {
            Some(JobType::Contract)
        } else if lower.contains("temp") {
            Some(JobType::Temporary)
        } else if lower.contains("part") {
            Some(JobType::PartTime)
        } else if lower.contains("full") || lower.contains("permanent") {
            Some(JobType::FullTime)
        } else {
            None
        }
    }

    fn extract_skills(&self, description: &str) -> Vec<String> {
        let lower = description.to_lowercase();
        let mut found: Vec<String> = SKILL_VOCABULARY
            .iter()
            .filter(|skill| lower.contains(*skill))
            .map(|s| s.to_string())
            .collect();
        found.sort();
        found.dedup();
        found
    }
}

fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            current.push(ch);
        } else if ch == ',' && !current.is_empty() {
            // thousands separator inside a number, e.g. "80,000"
            continue;
        } else {
            if !current.is_empty() {
                if let Ok(n) = current.parse::<f64>() {
                    numbers.push(n);
                }
                current.clear();
            }
        }
    }
    if !current.is_empty() {
        if let Ok(n) = current.parse::<f64>() {
            numbers.push(n);
        }
    }
    // "80k" style suffix: detect immediately-following 'k' and scale x1000.
    let mut scaled = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut number_positions: Vec<(f64, usize)> = Vec::new();
    {
        let mut current = String::new();
        let mut start = 0usize;
        for (i, ch) in text.char_indices() {
            if ch.is_ascii_digit() || ch == '.' {
                if current.is_empty() {
                    start = i;
                }
                current.push(ch);
            } else {
                if !current.is_empty() {
                    if let Ok(n) = current.parse::<f64>() {
                        number_positions.push((n, start + current.len()));
                    }
                    current.clear();
                }
            }
        }
        if !current.is_empty() {
            if let Ok(n) = current.parse::<f64>() {
                number_positions.push((n, start + current.len()));
            }
        }
    }
    let bytes = text.as_bytes();
    for (n, end) in number_positions {
        let is_k = bytes.get(end).map(|b| *b as char == 'k').unwrap_or(false);
        scaled.push(if is_k { n * 1000.0 } else { n });
    }
    let _ = chars.next(); // silence unused warning path when text is empty
    if scaled.is_empty() { numbers } else { scaled }
}

/// Weighted completeness across required and optional fields.
pub fn quality_score(job: &NormalizedJob) -> f64 {
    let required_present = [!job.title.is_empty(), !job.company.is_empty(), !job.description.is_empty()];
    let required_fraction =
        required_present.iter().filter(|p| **p).count() as f64 / required_present.len() as f64;

    let optional_present = [
        job.city.is_some() || job.location.is_some(),
        job.salary_min.is_some(),
        job.job_type.is_some(),
        job.experience_level.is_some(),
        job.posted_date.is_some(),
    ];
    let optional_fraction =
        optional_present.iter().filter(|p| **p).count() as f64 / optional_present.len() as f64;

    0.6 * required_fraction + 0.4 * optional_fraction
}

/// Fraction of all modeled fields present, independent of the quality
/// weighting above — tracked separately per the richer original model.
pub fn completeness_score(job: &NormalizedJob) -> f64 {
    let fields: [bool; 10] = [
        !job.title.is_empty(),
        !job.company.is_empty(),
        !job.description.is_empty(),
        job.city.is_some() || job.location.is_some(),
        job.salary_min.is_some(),
        job.job_type.is_some(),
        job.experience_level.is_some(),
        job.posted_date.is_some(),
        !job.skills.is_empty(),
        job.remote_allowed.is_some(),
    ];
    fields.iter().filter(|p| **p).count() as f64 / fields.len() as f64
}

/// Normalizes one raw record. Never fails: missing or unparseable fields
/// become `None` rather than an error, since a partial normalization is
/// still useful (it is simply scored lower and may not be published).
pub fn normalize(raw: &RawJob, backend: &dyn NormalizerBackend, quality_threshold: f64) -> NormalizedJob {
    let now = Utc::now();
    let salary = raw
        .salary_text
        .as_deref()
        .map(|t| backend.parse_salary(t))
        .unwrap_or(ParsedSalary {
            min: None,
            max: None,
            currency: None,
            period: None,
        });
    let location = raw
        .location
        .as_deref()
        .map(|t| backend.parse_location(t))
        .unwrap_or_default();
    let posted_date = raw.posted_date_text.as_deref().and_then(|t| backend.parse_date(t, now));
    let job_type = raw.job_type_text.as_deref().and_then(|t| backend.canonicalize_job_type(t));
    let skills = backend.extract_skills(&raw.description);

    let mut job = NormalizedJob {
        id: uuid::Uuid::new_v4(),
        raw_job_id: raw.id,
        board_id: raw.board_id,
        title: raw.title.clone(),
        company: raw.company.clone(),
        location: if location.confidence >= 0.5 {
            None
        } else {
            raw.location.clone()
        },
        description: raw.description.clone(),
        requirements: None,
        benefits: None,
        salary_min: salary.min,
        salary_max: salary.max,
        salary_currency: salary.currency,
        salary_period: salary.period,
        job_type,
        experience_level: None,
        remote_allowed: raw
            .location
            .as_deref()
            .map(|l| l.to_lowercase().contains("remote")),
        city: location.city.clone(),
        state: location.state.clone(),
        country: location.country.clone(),
        posted_date,
        skills,
        tags: Vec::new(),
        quality_score: 0.0,
        completeness_score: 0.0,
        normalization_confidence: location.confidence,
        normalization_method: NormalizationMethod::RuleBased,
        is_published: false,
        job_post_id: None,
        duplicate_of: None,
        exported_to_main_db: false,
        exported_at: None,
        export_error: None,
        created_at: now,
    };
    job.quality_score = quality_score(&job);
    job.completeness_score = completeness_score(&job);
    job.is_published = job.quality_score >= quality_threshold;
    job
}

const BATCH_SIZE: u64 = 50;
const DEFAULT_QUALITY_THRESHOLD: f64 = 0.5;

/// Asynchronous loop draining unprocessed [`RawJob`]s into
/// [`NormalizedJob`]s, separate from the executor that produced them so a
/// slow normalizer backend never blocks page fetching.
pub struct NormalizerTask {
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn NormalizerBackend>,
    poll_interval: Duration,
    cancellation: CancellationToken,
}

impl NormalizerTask {
    pub fn new(store: Arc<dyn DocumentStore>, backend: Arc<dyn NormalizerBackend>, poll_interval: Duration) -> Self {
        Self {
            store,
            backend,
            poll_interval,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if let Err(err) = self.drain_once().await {
                tracing::warn!(%err, "normalizer pass failed");
            }
        }
    }

    /// Normalizes up to `BATCH_SIZE` unprocessed raws. Exposed separately
    /// from `run` so tests can drive it deterministically.
    pub async fn drain_once(&self) -> Result<usize> {
        let raws = self.store.list_unprocessed_raw_jobs(BATCH_SIZE).await?;
        let mut boards = std::collections::HashMap::new();
        let mut processed = 0;
        for raw in raws {
            let threshold = match boards.entry(raw.board_id) {
                std::collections::hash_map::Entry::Occupied(e) => *e.get(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    let threshold = self
                        .store
                        .get_board(raw.board_id)
                        .await?
                        .map(|b| b.quality_threshold)
                        .unwrap_or(DEFAULT_QUALITY_THRESHOLD);
                    *e.insert(threshold)
                }
            };
            let normalized = normalize(&raw, self.backend.as_ref(), threshold);
            self.store.put_normalized_job(normalized).await?;
            self.store.mark_raw_job_processed(raw.id).await?;
            processed += 1;
        }
        Ok(processed)
    }
}
