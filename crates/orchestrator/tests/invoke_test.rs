//! End-to-end invocation behaviour through the orchestrator façade.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use domain::capability::SeoRequest;
use domain::{
    Capability, CapabilityInput, CapabilityOutput, ErrorKind, RateScopePolicy, Timestamp, TransportError,
    WorkerError, WorkerRequest, WorkerResponse, WorkerTransport,
};
use orchestrator::{Orchestrator, OrchestratorBuilder, WorkerStatus, WORKER_NAME_HEADER};
use store::InMemoryConfigStore;

fn status_of(orchestrator: &Orchestrator, worker: &str) -> WorkerStatus {
    orchestrator
        .worker_status()
        .unwrap()
        .workers
        .into_iter()
        .find(|w| w.worker == worker)
        .unwrap()
}

fn seo(question: &str) -> CapabilityInput {
    CapabilityInput::SeoAnalyzer(SeoRequest {
        question: question.into(),
        answer: "An answer.".into(),
        page_url: None,
    })
}

#[tokio::test]
async fn second_call_in_the_window_is_denied_until_reset() {
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let clock = clock();
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        transport.clone(),
        clock.clone(),
    )
    .await;
    let client = visitor("192.0.2.10");

    let first = orchestrator.invoke(question("WordPress"), &client).await;
    assert!(matches!(first, Ok(CapabilityOutput::QuestionGenerator(_))));
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 1);

    clock.advance(Duration::from_secs(600));
    match orchestrator.invoke(question("WordPress"), &client).await {
        Err(WorkerError::RateLimited {
            remaining,
            reset_at,
            limit,
            ..
        }) => {
            assert_eq!(remaining, 0);
            assert_eq!(limit, 1);
            assert_eq!(reset_at, Timestamp::from_unix_secs(T0 + 3_600));
        }
        other => panic!("expected a rate limit denial, got {other:?}"),
    }
    assert_eq!(transport.calls(), 1);

    clock.advance(Duration::from_secs(3_000));
    assert!(matches!(
        orchestrator.invoke(question("WordPress"), &client).await,
        Err(WorkerError::RateLimited { .. })
    ));

    clock.advance(Duration::from_secs(1));
    assert!(orchestrator.invoke(question("WordPress"), &client).await.is_ok());
}

#[tokio::test]
async fn dispatch_carries_endpoint_headers_and_sanitized_body() {
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport.clone(),
        clock(),
    )
    .await;

    orchestrator
        .invoke(question("  <b>Word</b>Press  "), &visitor("192.0.2.10"))
        .await
        .unwrap();

    let request = &transport.requests()[0];
    assert_eq!(request.url, "https://question-generator.example.com");
    assert_eq!(request.timeout, Duration::from_secs(30));
    assert!(request
        .headers
        .contains(&(WORKER_NAME_HEADER.to_string(), "question_generator".to_string())));
    assert!(request
        .headers
        .contains(&("user-agent".to_string(), "faqworks/test".to_string())));
    let body = request.body.as_ref().unwrap();
    assert_eq!(body["topic"], "WordPress");
    assert_eq!(body["count"], 12);
}

#[tokio::test]
async fn blocked_clients_never_consume_quota() {
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport.clone(),
        clock(),
    )
    .await;
    orchestrator.block_ip("203.0.113.9", "abuse", 0).unwrap();

    match orchestrator.invoke(question("WordPress"), &visitor("203.0.113.9")).await {
        Err(WorkerError::IpBlocked {
            reason, expires_at, ..
        }) => {
            assert_eq!(reason, "abuse");
            assert_eq!(expires_at, None);
        }
        other => panic!("expected a block, got {other:?}"),
    }
    assert_eq!(transport.calls(), 0);
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 0);
    assert!(orchestrator.export_state().unwrap().rate_windows.is_empty());
    assert_eq!(orchestrator.analytics(1).unwrap().total_requests, 1);
}

#[tokio::test]
async fn forwarded_headers_identify_the_client() {
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport.clone(),
        clock(),
    )
    .await;
    orchestrator.block_ip("203.0.113.50", "scraper", 1).unwrap();

    let client = visitor("10.0.0.1").with_header("X-Forwarded-For", "203.0.113.50, 10.0.0.1");
    let result = orchestrator.invoke(question("WordPress"), &client).await;
    assert!(matches!(result, Err(WorkerError::IpBlocked { .. })));
}

#[tokio::test]
async fn configuration_and_input_errors_never_dispatch() {
    let mut disabled = worker(Capability::QuestionGenerator, 10);
    disabled.enabled = false;
    let mut no_url = worker(Capability::TopicGenerator, 10);
    no_url.url.clear();
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let orchestrator = orchestrator(
        vec![disabled, no_url, worker(Capability::SeoAnalyzer, 10)],
        transport.clone(),
        clock(),
    )
    .await;
    let client = visitor("192.0.2.10");

    let err = orchestrator.invoke(question("WordPress"), &client).await.unwrap_err();
    assert!(matches!(err, WorkerError::WorkerDisabled { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let topics = CapabilityInput::from_json(
        Capability::TopicGenerator,
        serde_json::json!({"operation": "topics", "context": "plugins"}),
    )
    .unwrap();
    let err = orchestrator.invoke(topics, &client).await.unwrap_err();
    assert!(matches!(err, WorkerError::MissingUrl { .. }));

    let err = orchestrator.invoke(seo("   "), &client).await.unwrap_err();
    assert!(matches!(err, WorkerError::InvalidInput { .. }));
    // The slot reserved for the rejected input was handed back.
    assert_eq!(status_of(&orchestrator, "seo_analyzer").usage.current, 0);

    assert_eq!(transport.calls(), 0);
    assert_eq!(orchestrator.analytics(1).unwrap().fail_count, 3);
}

#[tokio::test]
async fn response_errors_dispatch_exactly_once() {
    for reply in [
        ok(r#"{"error": "quota exhausted"}"#),
        status(400, r#"{"error": "bad request"}"#),
        ok("not json"),
        ok(r#"{"seoScore": 80, "voiceSearchScore": 70}"#),
    ] {
        let transport = ScriptedTransport::always(reply);
        let orchestrator = orchestrator(
            vec![worker(Capability::SeoAnalyzer, 10)],
            transport.clone(),
            clock(),
        )
        .await;
        let err = orchestrator
            .invoke(seo("What is X?"), &visitor("192.0.2.10"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Response, "{err}");
        assert_eq!(transport.calls(), 1, "{err}");
        assert_eq!(status_of(&orchestrator, "seo_analyzer").usage.current, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn transport_failures_are_retried_then_surface() {
    let transport = ScriptedTransport::always(refused());
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport.clone(),
        clock(),
    )
    .await;

    let err = orchestrator
        .invoke(question("WordPress"), &visitor("192.0.2.10"))
        .await
        .unwrap_err();
    match &err {
        WorkerError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, WorkerError::Transport { .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(transport.calls(), 3);
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 0);

    let stats = orchestrator.analytics(1).unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.fail_count, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_statuses_recover() {
    let transport = ScriptedTransport::scripted(
        vec![status(429, ""), status(502, "<html>bad gateway</html>")],
        ok(QUESTIONS),
    );
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport.clone(),
        clock(),
    )
    .await;

    let result = orchestrator
        .invoke(question("WordPress"), &visitor("192.0.2.10"))
        .await;
    assert!(result.is_ok());
    assert_eq!(transport.calls(), 3);
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 1);
}

#[tokio::test]
async fn seo_scores_are_clamped_and_required() {
    let transport = ScriptedTransport::scripted(
        vec![ok(
            r#"{"seoScore": 150, "readabilityScore": 72, "voiceSearchScore": -5, "suggestions": ["Shorten it"]}"#,
        )],
        ok(r#"{"seoScore": 80, "voiceSearchScore": 70}"#),
    );
    let orchestrator = orchestrator(
        vec![worker(Capability::SeoAnalyzer, 10)],
        transport.clone(),
        clock(),
    )
    .await;
    let client = visitor("192.0.2.10");

    match orchestrator.invoke(seo("What is X?"), &client).await {
        Ok(CapabilityOutput::SeoAnalyzer(analysis)) => {
            assert_eq!(analysis.seo_score.value(), 100);
            assert_eq!(analysis.readability_score.value(), 72);
            assert_eq!(analysis.voice_search_score.value(), 0);
            assert_eq!(analysis.suggestions, vec!["Shorten it".to_string()]);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let err = orchestrator.invoke(seo("What is X?"), &client).await.unwrap_err();
    assert!(
        matches!(&err, WorkerError::InvalidResponse { message, .. } if message.contains("readabilityScore")),
        "{err}"
    );
    assert_eq!(
        transport.requests()[0].url,
        "https://seo-analyzer.example.com/analyze"
    );
}

#[tokio::test]
async fn blank_questions_are_dropped() {
    let transport = ScriptedTransport::always(ok(
        r#"{"questions": ["What is X?", "", "  ", "How does Y work?"]}"#,
    ));
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 10)],
        transport,
        clock(),
    )
    .await;

    match orchestrator.invoke(question("X"), &visitor("192.0.2.10")).await {
        Ok(CapabilityOutput::QuestionGenerator(set)) => assert_eq!(
            set.questions,
            vec!["What is X?".to_string(), "How does Y work?".to_string()]
        ),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn whitelisted_clients_bypass_rate_limits() {
    let transport = ScriptedTransport::always(ok(QUESTIONS));
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        transport.clone(),
        clock(),
    )
    .await;
    orchestrator.allow_ip("192.0.2.77", "office").unwrap();

    for _ in 0..3 {
        orchestrator
            .invoke(question("WordPress"), &visitor("192.0.2.77"))
            .await
            .unwrap();
    }
    assert_eq!(transport.calls(), 3);
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 0);
    assert_eq!(orchestrator.activity(10).unwrap().len(), 3);
}

#[tokio::test]
async fn per_client_scope_counts_each_address() {
    let mut config = worker(Capability::QuestionGenerator, 1);
    config.rate_scope = RateScopePolicy::PerClient;
    let orchestrator = orchestrator(vec![config], ScriptedTransport::always(ok(QUESTIONS)), clock()).await;

    let a = visitor("192.0.2.1");
    let b = visitor("192.0.2.2");
    assert!(orchestrator.invoke(question("x"), &a).await.is_ok());
    assert!(matches!(
        orchestrator.invoke(question("x"), &a).await,
        Err(WorkerError::RateLimited { .. })
    ));
    assert!(orchestrator.invoke(question("x"), &b).await.is_ok());
}

#[tokio::test]
async fn repeated_violations_auto_block_the_client() {
    let orchestrator = orchestrator(
        vec![worker(Capability::QuestionGenerator, 1)],
        ScriptedTransport::always(ok(QUESTIONS)),
        clock(),
    )
    .await;
    let client = visitor("198.51.100.4");

    orchestrator.invoke(question("x"), &client).await.unwrap();
    for _ in 0..5 {
        let err = orchestrator.invoke(question("x"), &client).await.unwrap_err();
        assert!(matches!(err, WorkerError::RateLimited { .. }));
    }

    match orchestrator.invoke(question("x"), &client).await {
        Err(WorkerError::IpBlocked { expires_at, .. }) => {
            assert_eq!(expires_at, Some(Timestamp::from_unix_secs(T0 + 24 * 3_600)));
        }
        other => panic!("expected an automatic block, got {other:?}"),
    }
    let blocked = orchestrator.list_blocked().unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].added_by, "system");

    let summary = orchestrator.violations(24).unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].count, 5);
    assert!(summary[0].blocked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_exceed_the_limit() {
    let orchestrator = Arc::new(
        orchestrator(
            vec![worker(Capability::QuestionGenerator, 5)],
            ScriptedTransport::always(ok(QUESTIONS)),
            clock(),
        )
        .await,
    );

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .invoke(question("WordPress"), &visitor(&format!("198.51.100.{}", i + 1)))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut denied = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WorkerError::RateLimited { .. }) => denied += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 5);
    assert_eq!(denied, 15);
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 5);
}

/// Never answers its first request; answers every later one.
struct StallsOnce {
    stalled: AtomicBool,
}

#[async_trait]
impl WorkerTransport for StallsOnce {
    async fn send(&self, _request: WorkerRequest) -> Result<WorkerResponse, TransportError> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(WorkerResponse {
            status: 200,
            body: QUESTIONS.to_string(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_returns_its_slot() {
    let orchestrator = OrchestratorBuilder::new(
        Arc::new(InMemoryConfigStore::with_workers([worker(Capability::QuestionGenerator, 1)])),
        Arc::new(StallsOnce {
            stalled: AtomicBool::new(false),
        }),
    )
    .clock(clock())
    .build()
    .await;
    let client = visitor("192.0.2.10");

    let abandoned =
        tokio::time::timeout(Duration::from_secs(5), orchestrator.invoke(question("x"), &client)).await;
    assert!(abandoned.is_err());
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 0);

    assert!(orchestrator.invoke(question("x"), &client).await.is_ok());
    assert_eq!(status_of(&orchestrator, "question_generator").usage.current, 1);
}
