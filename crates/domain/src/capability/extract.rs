//! FAQ extraction: a page URL in, the question/answer pairs found on it out.
//!
//! This is a batch capability. Entries without both a question and an answer
//! are dropped; the call only fails if the `faqs` list itself is absent.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Confidence, Timestamp, WorkerError};

use super::fields::{self, Object};
use super::{Capability, CapabilityStrategy, ResponseError};

const DEFAULT_MAX_FAQS: u32 = 10;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub url: String,
    #[serde(default)]
    pub max_faqs: Option<u32>,
    #[serde(default = "yes")]
    pub include_metadata: bool,
    #[serde(default = "yes")]
    pub extract_schema: bool,
    #[serde(default = "yes")]
    pub follow_redirects: bool,
}

impl ExtractRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_faqs: None,
            include_metadata: true,
            extract_schema: true,
            follow_redirects: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFaq {
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub total_faqs_found: Option<i64>,
    pub extraction_time: Option<i64>,
    pub page_load_time: Option<i64>,
    pub schema_found: Option<bool>,
    /// `@type` of embedded structured data, when the page had any.
    pub schema_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub processed: Option<i64>,
    pub extracted: Option<i64>,
    pub filtered: Option<i64>,
    pub processing_time_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub faqs: Vec<ExtractedFaq>,
    pub metadata: Option<ExtractionMetadata>,
    pub stats: Option<ExtractionStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStrategy;

fn faq(item: &Object) -> Option<ExtractedFaq> {
    Some(ExtractedFaq {
        question: fields::text(item, "question")?,
        answer: fields::textarea(item, "answer")?,
        id: fields::text(item, "id"),
        category: fields::text(item, "category"),
        confidence: fields::float(item, "confidence").map(Confidence::clamped),
        source: fields::text(item, "source"),
    })
}

fn metadata(meta: &Object) -> ExtractionMetadata {
    ExtractionMetadata {
        url: meta
            .get("url")
            .and_then(Value::as_str)
            .and_then(|u| sanitize::url(u).ok()),
        title: fields::text(meta, "title"),
        description: fields::text(meta, "description"),
        total_faqs_found: fields::int(meta, "totalFaqsFound"),
        extraction_time: fields::int(meta, "extractionTime"),
        page_load_time: fields::int(meta, "pageLoadTime"),
        schema_found: fields::boolean(meta, "schemaFound"),
        schema_type: fields::object(meta, "schemaData").and_then(|s| fields::text(s, "@type")),
    }
}

fn stats(stats: &Object) -> ExtractionStats {
    ExtractionStats {
        processed: fields::int(stats, "processed"),
        extracted: fields::int(stats, "extracted"),
        filtered: fields::int(stats, "filtered"),
        processing_time_ms: fields::int(stats, "processingTimeMs"),
    }
}

impl CapabilityStrategy for ExtractStrategy {
    type Input = ExtractRequest;
    type Output = ExtractionResult;

    fn capability(&self) -> Capability {
        Capability::FaqExtractor
    }

    fn build_request(&self, input: &ExtractRequest, now: Timestamp) -> Result<Value, WorkerError> {
        let url = sanitize::url(&input.url).map_err(|e| WorkerError::invalid_input("url", e))?;
        Ok(json!({
            "url": url,
            "maxFaqs": input.max_faqs.unwrap_or(DEFAULT_MAX_FAQS).max(1),
            "includeMetadata": input.include_metadata,
            "extractSchema": input.extract_schema,
            "followRedirects": input.follow_redirects,
            "timestamp": now.unix_secs(),
        }))
    }

    fn validate(&self, body: &Value) -> Result<ExtractionResult, ResponseError> {
        let root = fields::root(body)?;
        let items = fields::array(root, "faqs")
            .ok_or_else(|| ResponseError::Invalid("missing 'faqs' list".into()))?;
        Ok(ExtractionResult {
            faqs: items.iter().filter_map(Value::as_object).filter_map(faq).collect(),
            metadata: fields::object(root, "metadata").map(metadata),
            stats: fields::object(root, "stats").map(stats),
        })
    }
}
