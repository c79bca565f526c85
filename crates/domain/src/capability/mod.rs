//! The six worker capabilities.
//!
//! Each capability is a [`CapabilityStrategy`]: it knows how to turn a typed
//! request into the JSON body its worker expects, and how to decode and
//! validate that worker's reply into a typed result. Everything else about a
//! call (admission, dispatch, retry, analytics) is shared and lives in the
//! orchestrator.
//!
//! Validation is fail-closed on required fields and lenient on optional ones:
//! a malformed list element is dropped, a missing required score rejects the
//! whole response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Timestamp, WorkerError, WorkerName};

mod answer;
mod enhance;
mod extract;
pub(crate) mod fields;
mod question;
mod seo;
mod topic;

pub use answer::{AnswerContext, AnswerRequest, AnswerSet, AnswerStrategy, AnswerSuggestion};
pub use enhance::{
    AdditionalSuggestion, EnhanceRequest, EnhanceStrategy, Enhancements, QuestionVariation,
    VariationAnswers,
};
pub use extract::{
    ExtractRequest, ExtractStrategy, ExtractedFaq, ExtractionMetadata, ExtractionResult,
    ExtractionStats,
};
pub use question::{QuestionRequest, QuestionSet, QuestionStrategy};
pub use seo::{SeoAnalysis, SeoDetails, SeoReasoning, SeoRequest, SeoStrategy};
pub use topic::{
    GeneratedQuestion, QuestionListMetadata, Topic, TopicListMetadata, TopicListRequest,
    TopicOutput, TopicQuestionsRequest, TopicRequest, TopicStrategy,
};

// ---------------------------------------------------------------------------
// Capability identity
// ---------------------------------------------------------------------------

/// One of the six external worker capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    QuestionGenerator,
    AnswerGenerator,
    FaqEnhancer,
    SeoAnalyzer,
    FaqExtractor,
    TopicGenerator,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::QuestionGenerator,
        Self::AnswerGenerator,
        Self::FaqEnhancer,
        Self::SeoAnalyzer,
        Self::FaqExtractor,
        Self::TopicGenerator,
    ];

    /// Configuration key of the worker serving this capability.
    pub fn worker_name(self) -> &'static str {
        match self {
            Self::QuestionGenerator => "question_generator",
            Self::AnswerGenerator => "answer_generator",
            Self::FaqEnhancer => "faq_enhancer",
            Self::SeoAnalyzer => "seo_analyzer",
            Self::FaqExtractor => "faq_extractor",
            Self::TopicGenerator => "topic_generator",
        }
    }

    /// Path appended to the worker's base URL on dispatch.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            Self::QuestionGenerator | Self::AnswerGenerator => "",
            Self::FaqEnhancer => "/enhance",
            Self::SeoAnalyzer => "/analyze",
            Self::FaqExtractor => "/extract",
            Self::TopicGenerator => "/generate-topics",
        }
    }

    pub fn from_worker_name(name: &WorkerName) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.worker_name() == name.as_str())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.worker_name())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    /// Accepts worker names (`seo_analyzer`, `seo-analyzer`) and short forms
    /// (`seo`, `question`, `topic`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = WorkerName::new(s).ok_or_else(|| format!("unknown capability '{s}'"))?;
        if let Some(capability) = Self::from_worker_name(&name) {
            return Ok(capability);
        }
        match name.as_str() {
            "question" | "questions" => Ok(Self::QuestionGenerator),
            "answer" | "answers" => Ok(Self::AnswerGenerator),
            "enhance" | "enhancer" => Ok(Self::FaqEnhancer),
            "seo" => Ok(Self::SeoAnalyzer),
            "extract" | "extractor" => Ok(Self::FaqExtractor),
            "topic" | "topics" => Ok(Self::TopicGenerator),
            _ => Err(format!("unknown capability '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Why a worker reply could not be turned into a typed result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The body carried an `error` field.
    #[error("worker reported: {0}")]
    Reported(String),
    /// Required structure is missing or malformed.
    #[error("{0}")]
    Invalid(String),
}

/// Per-capability request construction and response validation.
pub trait CapabilityStrategy: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn capability(&self) -> Capability;

    /// Sanitizes `input` and renders the worker's JSON request body.
    fn build_request(&self, input: &Self::Input, now: Timestamp) -> Result<Value, WorkerError>;

    /// Decodes a reply that has already passed [`reject_reported_error`].
    fn validate(&self, body: &Value) -> Result<Self::Output, ResponseError>;
}

/// Fails if the decoded body carries a top-level `error` field, whatever the
/// HTTP status was.
pub fn reject_reported_error(body: &Value) -> Result<(), ResponseError> {
    let Some(error) = body.as_object().and_then(|o| o.get("error")) else {
        return Ok(());
    };
    let message = match error {
        Value::Null => return Ok(()),
        Value::String(s) => crate::sanitize::text(s),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(crate::sanitize::text)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };
    Err(ResponseError::Reported(message))
}

// ---------------------------------------------------------------------------
// Tagged input and output
// ---------------------------------------------------------------------------

/// A request for any capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", content = "input", rename_all = "snake_case")]
pub enum CapabilityInput {
    QuestionGenerator(QuestionRequest),
    AnswerGenerator(AnswerRequest),
    FaqEnhancer(EnhanceRequest),
    SeoAnalyzer(SeoRequest),
    FaqExtractor(ExtractRequest),
    TopicGenerator(TopicRequest),
}

impl CapabilityInput {
    pub fn capability(&self) -> Capability {
        match self {
            Self::QuestionGenerator(_) => Capability::QuestionGenerator,
            Self::AnswerGenerator(_) => Capability::AnswerGenerator,
            Self::FaqEnhancer(_) => Capability::FaqEnhancer,
            Self::SeoAnalyzer(_) => Capability::SeoAnalyzer,
            Self::FaqExtractor(_) => Capability::FaqExtractor,
            Self::TopicGenerator(_) => Capability::TopicGenerator,
        }
    }

    /// Decodes the request payload for `capability` from free-form JSON.
    pub fn from_json(capability: Capability, payload: Value) -> Result<Self, WorkerError> {
        fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, WorkerError> {
            serde_json::from_value(payload).map_err(|e| WorkerError::invalid_input("input", e.to_string()))
        }
        Ok(match capability {
            Capability::QuestionGenerator => Self::QuestionGenerator(decode(payload)?),
            Capability::AnswerGenerator => Self::AnswerGenerator(decode(payload)?),
            Capability::FaqEnhancer => Self::FaqEnhancer(decode(payload)?),
            Capability::SeoAnalyzer => Self::SeoAnalyzer(decode(payload)?),
            Capability::FaqExtractor => Self::FaqExtractor(decode(payload)?),
            Capability::TopicGenerator => Self::TopicGenerator(decode(payload)?),
        })
    }
}

/// A validated result of any capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "capability", content = "result", rename_all = "snake_case")]
pub enum CapabilityOutput {
    QuestionGenerator(QuestionSet),
    AnswerGenerator(AnswerSet),
    FaqEnhancer(Enhancements),
    SeoAnalyzer(SeoAnalysis),
    FaqExtractor(ExtractionResult),
    TopicGenerator(TopicOutput),
}
