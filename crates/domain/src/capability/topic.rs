//! Topic generation.
//!
//! The topic worker serves two operations behind one endpoint: brainstorming
//! FAQ topics for a business context, and generating questions for a single
//! topic. Its reply is polymorphic; the validator dispatches on whether a
//! `topics` or a `questions` list is present.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{sanitize, Timestamp, WorkerError};

use super::fields::{self, Object};
use super::{Capability, CapabilityStrategy, ResponseError};

const DEFAULT_NUM_TOPICS: u32 = 10;
const DEFAULT_NUM_QUESTIONS: u32 = 5;
const DEFAULT_DIFFICULTY: &str = "mixed";
const DEFAULT_FORMAT: &str = "structured";
const DEFAULT_QUESTION_TYPES: [&str; 4] = ["what", "how", "why", "when"];

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicListRequest {
    /// Description of the business or site to brainstorm for.
    pub context: String,
    #[serde(default)]
    pub num_topics: Option<u32>,
    #[serde(default = "yes")]
    pub include_subtopics: bool,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicQuestionsRequest {
    pub topic: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub num_questions: Option<u32>,
    #[serde(default)]
    pub question_types: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TopicRequest {
    Topics(TopicListRequest),
    Questions(TopicQuestionsRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub priority: Option<i64>,
    pub subtopics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicListMetadata {
    pub total_topics: Option<i64>,
    pub processing_time: Option<i64>,
    pub model: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedQuestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub difficulty: Option<String>,
    pub category: Option<String>,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionListMetadata {
    pub total_questions: Option<i64>,
    pub processing_time: Option<i64>,
    pub model: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicOutput {
    Topics {
        topics: Vec<Topic>,
        metadata: Option<TopicListMetadata>,
    },
    Questions {
        questions: Vec<GeneratedQuestion>,
        metadata: Option<QuestionListMetadata>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicStrategy;

fn option_text(value: Option<&str>, default: &str) -> String {
    value
        .map(sanitize::text)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn topic(item: &Object) -> Option<Topic> {
    Some(Topic {
        title: fields::text(item, "title")?,
        description: fields::textarea(item, "description"),
        category: fields::text(item, "category"),
        difficulty: fields::text(item, "difficulty"),
        priority: fields::int(item, "priority"),
        subtopics: fields::text_list(item, "subtopics"),
    })
}

fn question(item: &Object) -> Option<GeneratedQuestion> {
    Some(GeneratedQuestion {
        text: fields::text(item, "text")?,
        kind: fields::text(item, "type"),
        difficulty: fields::text(item, "difficulty"),
        category: fields::text(item, "category"),
        priority: fields::int(item, "priority"),
    })
}

fn elements<T>(items: &[Value], decode: fn(&Object) -> Option<T>) -> Vec<T> {
    items.iter().filter_map(Value::as_object).filter_map(decode).collect()
}

impl CapabilityStrategy for TopicStrategy {
    type Input = TopicRequest;
    type Output = TopicOutput;

    fn capability(&self) -> Capability {
        Capability::TopicGenerator
    }

    fn build_request(&self, input: &TopicRequest, now: Timestamp) -> Result<Value, WorkerError> {
        match input {
            TopicRequest::Topics(req) => {
                let context = sanitize::textarea(&req.context);
                if context.is_empty() {
                    return Err(WorkerError::invalid_input("context", "context is required"));
                }
                Ok(json!({
                    "context": context,
                    "numTopics": req.num_topics.unwrap_or(DEFAULT_NUM_TOPICS).max(1),
                    "includeSubtopics": req.include_subtopics,
                    "difficulty": option_text(req.difficulty.as_deref(), DEFAULT_DIFFICULTY),
                    "format": option_text(req.format.as_deref(), DEFAULT_FORMAT),
                    "timestamp": now.unix_secs(),
                }))
            }
            TopicRequest::Questions(req) => {
                let topic = sanitize::text(&req.topic);
                if topic.is_empty() {
                    return Err(WorkerError::invalid_input("topic", "topic is required"));
                }
                let mut types: Vec<String> = req
                    .question_types
                    .iter()
                    .map(|t| sanitize::text(t))
                    .filter(|t| !t.is_empty())
                    .collect();
                if types.is_empty() {
                    types = DEFAULT_QUESTION_TYPES.iter().map(|t| t.to_string()).collect();
                }
                Ok(json!({
                    "action": "generate_questions",
                    "topic": topic,
                    "context": req.context.as_deref().map(sanitize::textarea).unwrap_or_default(),
                    "numQuestions": req.num_questions.unwrap_or(DEFAULT_NUM_QUESTIONS).max(1),
                    "questionTypes": types,
                    "difficulty": option_text(req.difficulty.as_deref(), DEFAULT_DIFFICULTY),
                    "timestamp": now.unix_secs(),
                }))
            }
        }
    }

    fn validate(&self, body: &Value) -> Result<TopicOutput, ResponseError> {
        let root = fields::root(body)?;
        if root.contains_key("topics") {
            let items = fields::array(root, "topics")
                .ok_or_else(|| ResponseError::Invalid("'topics' is not a list".into()))?;
            let metadata = fields::object(root, "metadata").map(|m| TopicListMetadata {
                total_topics: fields::int(m, "totalTopics"),
                processing_time: fields::int(m, "processingTime"),
                model: fields::text(m, "model"),
                context: fields::text(m, "context"),
            });
            return Ok(TopicOutput::Topics {
                topics: elements(items, topic),
                metadata,
            });
        }
        if root.contains_key("questions") {
            let items = fields::array(root, "questions")
                .ok_or_else(|| ResponseError::Invalid("'questions' is not a list".into()))?;
            let metadata = fields::object(root, "metadata").map(|m| QuestionListMetadata {
                total_questions: fields::int(m, "totalQuestions"),
                processing_time: fields::int(m, "processingTime"),
                model: fields::text(m, "model"),
                topic: fields::text(m, "topic"),
            });
            return Ok(TopicOutput::Questions {
                questions: elements(items, question),
                metadata,
            });
        }
        Err(ResponseError::Invalid(
            "response has neither 'topics' nor 'questions'".into(),
        ))
    }
}
