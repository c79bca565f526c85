//! Answer generation: a question (and optionally draft answers) in, suggested
//! answers out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Timestamp, WorkerError};

use super::{fields, Capability, CapabilityStrategy, ResponseError};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerContext {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub website_context: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    /// Existing answers to improve or validate.
    #[serde(default)]
    pub answers: Vec<String>,
    /// `generate`, `improve` or `validate`; defaults to `generate`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub context: AnswerContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerSuggestion {
    pub text: String,
    pub benefit: String,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerSet {
    pub suggestions: Vec<AnswerSuggestion>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerStrategy;

fn optional_url(field: &str, value: Option<&str>) -> Result<Option<String>, WorkerError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => sanitize::url(v)
            .map(Some)
            .map_err(|e| WorkerError::invalid_input(field, e)),
        None => Ok(None),
    }
}

impl CapabilityStrategy for AnswerStrategy {
    type Input = AnswerRequest;
    type Output = AnswerSet;

    fn capability(&self) -> Capability {
        Capability::AnswerGenerator
    }

    fn build_request(&self, input: &AnswerRequest, now: Timestamp) -> Result<Value, WorkerError> {
        let question = sanitize::text(&input.question);
        if question.is_empty() {
            return Err(WorkerError::invalid_input("question", "question is required"));
        }
        let answers: Vec<String> = input.answers.iter().map(|a| sanitize::text(a)).collect();
        let mode = input
            .mode
            .as_deref()
            .map(sanitize::text)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "generate".to_string());

        let ctx = &input.context;
        let mut context = serde_json::Map::new();
        if let Some(url) = optional_url("context.url", ctx.url.as_deref())? {
            context.insert("url".into(), Value::String(url));
        }
        if let Some(website) = ctx.website_context.as_deref().map(sanitize::textarea) {
            context.insert("websiteContext".into(), Value::String(website));
        }
        if let Some(page) = optional_url("context.pageUrl", ctx.page_url.as_deref())? {
            context.insert("pageUrl".into(), Value::String(page));
        }
        if let Some(tone) = ctx.tone.as_deref().map(sanitize::text) {
            context.insert("tone".into(), Value::String(tone));
        }

        Ok(json!({
            "question": question,
            "answers": answers,
            "mode": mode,
            "context": context,
            "timestamp": now.unix_secs(),
        }))
    }

    fn validate(&self, body: &Value) -> Result<AnswerSet, ResponseError> {
        let root = fields::root(body)?;
        let items = fields::array(root, "suggestions")
            .ok_or_else(|| ResponseError::Invalid("missing 'suggestions' list".into()))?;
        let suggestions = items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|item| {
                Some(AnswerSuggestion {
                    text: fields::text(item, "text")?,
                    benefit: fields::text_or_empty(item, "benefit"),
                    reason: fields::text_or_empty(item, "reason"),
                    kind: fields::text_or_empty(item, "type"),
                })
            })
            .collect();
        Ok(AnswerSet { suggestions })
    }
}
