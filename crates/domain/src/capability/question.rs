//! Question generation: a topic in, a list of candidate FAQ questions out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Timestamp, WorkerError};

use super::{fields, Capability, CapabilityStrategy, ResponseError};

const DEFAULT_COUNT: u32 = 12;
const MAX_COUNT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub topic: String,
    /// Questions wanted; clamped to `1..=50`, default 12.
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub existing_faqs: Vec<String>,
    #[serde(default)]
    pub additional_context: Option<String>,
}

impl QuestionRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            count: None,
            url: None,
            existing_faqs: Vec::new(),
            additional_context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionSet {
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionStrategy;

impl CapabilityStrategy for QuestionStrategy {
    type Input = QuestionRequest;
    type Output = QuestionSet;

    fn capability(&self) -> Capability {
        Capability::QuestionGenerator
    }

    fn build_request(&self, input: &QuestionRequest, now: Timestamp) -> Result<Value, WorkerError> {
        let topic = sanitize::text(&input.topic);
        if topic.is_empty() {
            return Err(WorkerError::invalid_input("topic", "topic is required"));
        }
        let count = input.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT);

        let mut context = serde_json::Map::new();
        if let Some(url) = input.url.as_deref().filter(|u| !u.trim().is_empty()) {
            let url = sanitize::url(url).map_err(|e| WorkerError::invalid_input("url", e))?;
            context.insert("url".into(), Value::String(url));
        }
        let existing: Vec<String> = input
            .existing_faqs
            .iter()
            .map(|q| sanitize::text(q))
            .filter(|q| !q.is_empty())
            .collect();
        if !existing.is_empty() {
            context.insert("existing_faqs".into(), json!(existing));
        }
        if let Some(extra) = input.additional_context.as_deref().map(sanitize::textarea) {
            if !extra.is_empty() {
                context.insert("additional_context".into(), Value::String(extra));
            }
        }

        Ok(json!({
            "topic": topic,
            "count": count,
            "context": context,
            "timestamp": now.unix_secs(),
        }))
    }

    fn validate(&self, body: &Value) -> Result<QuestionSet, ResponseError> {
        let root = fields::root(body)?;
        if fields::array(root, "questions").is_none() {
            return Err(ResponseError::Invalid("missing 'questions' list".into()));
        }
        Ok(QuestionSet {
            questions: fields::text_list(root, "questions"),
        })
    }
}
