//! FAQ enhancement: an existing question/answer pair in, improved variations
//! and follow-up suggestions out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Timestamp, WorkerError};

use super::fields::{self, Object};
use super::{Capability, CapabilityStrategy, ResponseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceRequest {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariationAnswers {
    pub optimised: String,
    pub detailed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionVariation {
    pub question: String,
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: String,
    pub seo_benefit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<VariationAnswers>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdditionalSuggestion {
    pub suggestion: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enhancements {
    pub question_variations: Vec<QuestionVariation>,
    pub additional_suggestions: Vec<AdditionalSuggestion>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnhanceStrategy;

fn variation(item: &Object) -> Option<QuestionVariation> {
    let answers = fields::object(item, "answers").map(|a| VariationAnswers {
        optimised: fields::textarea(a, "optimised").unwrap_or_default(),
        detailed: fields::textarea(a, "detailed").unwrap_or_default(),
    });
    Some(QuestionVariation {
        question: fields::text(item, "question")?,
        reason: fields::text_or_empty(item, "reason"),
        kind: fields::text_or_empty(item, "type"),
        priority: fields::text_or_empty(item, "priority"),
        seo_benefit: fields::text_or_empty(item, "seo_benefit"),
        answers,
    })
}

fn suggestion(item: &Object) -> Option<AdditionalSuggestion> {
    Some(AdditionalSuggestion {
        suggestion: fields::text(item, "suggestion")?,
        kind: fields::text_or_empty(item, "type"),
        reason: fields::text_or_empty(item, "reason"),
        impact: fields::text_or_empty(item, "impact"),
    })
}

fn collect<T>(obj: &Object, key: &str, decode: fn(&Object) -> Option<T>) -> Vec<T> {
    fields::array(obj, key)
        .map(|items| items.iter().filter_map(Value::as_object).filter_map(decode).collect())
        .unwrap_or_default()
}

impl CapabilityStrategy for EnhanceStrategy {
    type Input = EnhanceRequest;
    type Output = Enhancements;

    fn capability(&self) -> Capability {
        Capability::FaqEnhancer
    }

    fn build_request(&self, input: &EnhanceRequest, now: Timestamp) -> Result<Value, WorkerError> {
        let question = sanitize::text(&input.question);
        if question.is_empty() {
            return Err(WorkerError::invalid_input("question", "question is required"));
        }
        let answer = sanitize::textarea(&input.answer);
        if answer.is_empty() {
            return Err(WorkerError::invalid_input("answer", "answer is required"));
        }
        let page_url = match input.page_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => sanitize::url(url).map_err(|e| WorkerError::invalid_input("pageUrl", e))?,
            None => String::new(),
        };
        let session_id = input
            .session_id
            .as_deref()
            .map(sanitize::text)
            .unwrap_or_default();

        Ok(json!({
            "question": question,
            "answer": answer,
            "pageUrl": page_url,
            "sessionId": session_id,
            "timestamp": now.unix_secs(),
        }))
    }

    fn validate(&self, body: &Value) -> Result<Enhancements, ResponseError> {
        let root = fields::root(body)?;
        let enhancements = fields::object(root, "enhancements")
            .ok_or_else(|| ResponseError::Invalid("missing 'enhancements' object".into()))?;
        Ok(Enhancements {
            question_variations: collect(enhancements, "question_variations", variation),
            additional_suggestions: collect(enhancements, "additional_suggestions", suggestion),
        })
    }
}
