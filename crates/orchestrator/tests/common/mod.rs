//! Shared fixtures: a scripted transport, a manual clock and quick builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::capability::QuestionRequest;
use domain::{
    Capability, CapabilityInput, ClientContext, ManualClock, Timestamp, TransportError, WorkerConfig,
    WorkerName, WorkerRequest, WorkerResponse, WorkerTransport,
};
use orchestrator::{Orchestrator, OrchestratorBuilder};
use store::InMemoryConfigStore;

pub const T0: i64 = 1_700_000_000;

pub type Reply = Result<WorkerResponse, TransportError>;

pub fn ok(body: &str) -> Reply {
    status(200, body)
}

pub fn status(status: u16, body: &str) -> Reply {
    Ok(WorkerResponse {
        status,
        body: body.to_string(),
    })
}

pub fn refused() -> Reply {
    Err(TransportError {
        message: "connection refused".into(),
        timed_out: false,
    })
}

/// Replays queued replies in order, then repeats the fallback forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<WorkerRequest>>,
}

impl ScriptedTransport {
    pub fn always(reply: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
    async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_unix_secs(T0)))
}

/// An enabled worker with a URL and the given hourly limit.
pub fn worker(capability: Capability, rate_limit: u32) -> WorkerConfig {
    let mut config = WorkerConfig::defaults(WorkerName::from(capability));
    config.url = format!("https://{}.example.com", capability.worker_name().replace('_', "-"));
    config.rate_limit = rate_limit;
    config.rate_limit_period = domain::RatePeriod::Hourly;
    config.max_retries = 2;
    config.retry_delay_secs = 1;
    config
}

pub async fn orchestrator(
    workers: Vec<WorkerConfig>,
    transport: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
) -> Orchestrator {
    OrchestratorBuilder::new(Arc::new(InMemoryConfigStore::with_workers(workers)), transport)
        .clock(clock)
        .user_agent("faqworks/test")
        .build()
        .await
}

pub fn visitor(ip: &str) -> ClientContext {
    ClientContext::from_peer(ip.parse::<IpAddr>().unwrap())
}

pub fn question(topic: &str) -> CapabilityInput {
    CapabilityInput::QuestionGenerator(QuestionRequest::new(topic))
}

pub const QUESTIONS: &str = r#"{"questions": ["What is WordPress?", "How do I install it?"]}"#;
