//! HTTP persona and record collaborators against a mock server.

use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rehearsal_gateway::core::conversation::{EndReason, LoopOutcome, TranscriptLine};
use rehearsal_gateway::core::realtime::{RealtimeProvider, TranscriptRole};
use rehearsal_gateway::errors::GatewayError;
use rehearsal_gateway::services::{
    HttpPersonaSource, HttpSessionRecorder, PersonaSource, SessionRecord, SessionRecorder,
};

fn record(session_id: Option<&str>) -> SessionRecord {
    let started_at = OffsetDateTime::UNIX_EPOCH;
    SessionRecord::from_outcome(
        "peer-7",
        session_id.map(str::to_string),
        LoopOutcome {
            reason: EndReason::Stopped,
            provider: Some(RealtimeProvider::OpenAI),
            transcript: vec![
                TranscriptLine {
                    role: TranscriptRole::User,
                    text: "I'd like a raise.".into(),
                    at: started_at,
                },
                TranscriptLine {
                    role: TranscriptRole::Assistant,
                    text: "Make your case.".into(),
                    at: started_at + time::Duration::seconds(2),
                },
            ],
            started_at,
            ended_at: started_at + time::Duration::seconds(30),
        },
    )
}

#[tokio::test]
async fn test_persona_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-1/persona"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instructions": "You are the hiring manager.",
            "context": "The candidate is applying for a staff role."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpPersonaSource::new(format!("{}/", server.uri()));
    let persona = source.fetch_persona("s-1").await.unwrap().unwrap();
    assert_eq!(
        persona.into_instructions(),
        "You are the hiring manager.\n\nThe candidate is applying for a staff role."
    );
}

#[tokio::test]
async fn test_persona_not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/unknown/persona"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = HttpPersonaSource::new(server.uri());
    assert!(source.fetch_persona("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_persona_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .mount(&server)
        .await;

    let source = HttpPersonaSource::new(server.uri());
    match source.fetch_persona("s-1").await {
        Err(GatewayError::Collaborator(message)) => {
            assert!(message.contains("500"));
            assert!(message.contains("database down"));
        }
        other => panic!("expected collaborator error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_persona_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"instructions": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let source = HttpPersonaSource::new(server.uri()).with_timeout(Duration::from_millis(100));
    assert!(matches!(
        source.fetch_persona("s-1").await,
        Err(GatewayError::Collaborator(_))
    ));
}

#[tokio::test]
async fn test_recorder_posts_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-2/records"))
        .and(body_partial_json(json!({
            "peer_id": "peer-7",
            "session_id": "s-2",
            "provider": "openai",
            "end_reason": "stopped",
            "started_at": "1970-01-01T00:00:00Z",
            "ended_at": "1970-01-01T00:00:30Z",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = HttpSessionRecorder::new(server.uri());
    recorder.append(record(Some("s-2"))).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["transcript"][1]["text"], "Make your case.");
    assert_eq!(body["transcript"][1]["role"], "assistant");
}

#[tokio::test]
async fn test_recorder_falls_back_to_peer_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/peer-7/records"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = HttpSessionRecorder::new(server.uri());
    recorder.append(record(None)).await.unwrap();
}

#[tokio::test]
async fn test_recorder_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("transcript too long"))
        .mount(&server)
        .await;

    let recorder = HttpSessionRecorder::new(server.uri());
    match recorder.append(record(Some("s-3"))).await {
        Err(GatewayError::Collaborator(message)) => assert!(message.contains("422")),
        other => panic!("expected collaborator error, got {other:?}"),
    }
}
