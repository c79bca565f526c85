//! SEO analysis: a question/answer pair in, three bounded scores and advice out.
//!
//! The three scores are required. A reply missing any of them is rejected as a
//! whole; out-of-range values are clamped into `0..=100`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Score, Timestamp, WorkerError};

use super::fields::{self, Object};
use super::{Capability, CapabilityStrategy, ResponseError};

const REQUIRED_SCORES: [&str; 3] = ["seoScore", "readabilityScore", "voiceSearchScore"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoRequest {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoReasoning {
    pub seo: Option<String>,
    pub readability: Option<String>,
    pub voice_search: Option<String>,
}

/// The optional `analysis` block of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoDetails {
    pub question_length: Option<i64>,
    pub answer_word_count: Option<i64>,
    pub neurons: Option<i64>,
    pub ai_powered: Option<bool>,
    pub featured_snippet_potential: Option<bool>,
    pub position_zero_ready: Option<bool>,
    pub target_keyword: Option<String>,
    pub model: Option<String>,
    pub missing_elements: Vec<String>,
    pub reasoning: Option<SeoReasoning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoAnalysis {
    pub seo_score: Score,
    pub readability_score: Score,
    pub voice_search_score: Score,
    pub suggestions: Vec<String>,
    pub analysis: Option<SeoDetails>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeoStrategy;

fn required_score(root: &Object, key: &str) -> Result<Score, ResponseError> {
    if !root.contains_key(key) || root[key].is_null() {
        return Err(ResponseError::Invalid(format!("missing required field '{key}'")));
    }
    fields::int(root, key)
        .map(Score::clamped)
        .ok_or_else(|| ResponseError::Invalid(format!("field '{key}' is not numeric")))
}

fn details(analysis: &Object) -> SeoDetails {
    let reasoning = fields::object(analysis, "reasoning").map(|r| SeoReasoning {
        seo: fields::text(r, "seo"),
        readability: fields::text(r, "readability"),
        voice_search: fields::text(r, "voiceSearch"),
    });
    SeoDetails {
        question_length: fields::int(analysis, "questionLength"),
        answer_word_count: fields::int(analysis, "answerWordCount"),
        neurons: fields::int(analysis, "neurons"),
        ai_powered: fields::boolean(analysis, "aiPowered"),
        featured_snippet_potential: fields::boolean(analysis, "featuredSnippetPotential"),
        position_zero_ready: fields::boolean(analysis, "positionZeroReady"),
        target_keyword: fields::text(analysis, "targetKeyword"),
        model: fields::text(analysis, "model"),
        missing_elements: fields::text_list(analysis, "missingElements"),
        reasoning,
    }
}

impl CapabilityStrategy for SeoStrategy {
    type Input = SeoRequest;
    type Output = SeoAnalysis;

    fn capability(&self) -> Capability {
        Capability::SeoAnalyzer
    }

    fn build_request(&self, input: &SeoRequest, now: Timestamp) -> Result<Value, WorkerError> {
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
        Ok(json!({
            "question": question,
            "answer": answer,
            "pageUrl": page_url,
            "timestamp": now.unix_secs(),
        }))
    }

    fn validate(&self, body: &Value) -> Result<SeoAnalysis, ResponseError> {
        let root = fields::root(body)?;
        let [seo, readability, voice] = REQUIRED_SCORES;
        Ok(SeoAnalysis {
            seo_score: required_score(root, seo)?,
            readability_score: required_score(root, readability)?,
            voice_search_score: required_score(root, voice)?,
            suggestions: fields::text_list(root, "suggestions"),
            analysis: fields::object(root, "analysis").map(details),
        })
    }
}
