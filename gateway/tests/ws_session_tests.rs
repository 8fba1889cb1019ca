//! WebSocket Session Tests
//!
//! End-to-end tests of the `/ws` session protocol against a bound server with fake
//! speech and language collaborators.

mod common;

use std::sync::atomic::Ordering;

use futures::SinkExt;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite};

use common::*;

#[tokio::test]
async fn test_full_turn_over_websocket() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;

    let session_id = start_session(&mut client).await;
    assert!(!session_id.is_empty());

    send_audio(&mut client, b"quiero entrenar piernas").await;

    let complete = next_json(&mut client).await;
    assert_eq!(complete["type"], "transcriptionComplete", "{complete}");
    assert_eq!(complete["transcript"], "quiero entrenar piernas");
    assert_eq!(complete["aiResponse"]["text"], "Haz tres series de sentadillas");
    assert_eq!(complete["aiResponse"]["metadata"]["type"], "fitness_response");

    let mut audio = Vec::new();
    loop {
        match next_frame(&mut client).await {
            Frame::Audio(data) => audio.push(data),
            Frame::Json(value) => {
                assert_eq!(value["type"], "audioComplete", "{value}");
                break;
            }
        }
    }
    assert_eq!(audio, vec![&b"pcm-1"[..], &b"pcm-2"[..]]);

    assert_eq!(server.fakes.store.conversation_count("u1"), 1);
    assert_eq!(
        server.fakes.coach.inputs.lock().as_slice(),
        ["quiero entrenar piernas"]
    );
}

#[tokio::test]
async fn test_interim_transcripts_are_forwarded_only() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;
    start_session(&mut client).await;

    send_audio(&mut client, b"interim:quiero").await;

    let interim = next_json(&mut client).await;
    assert_eq!(interim["type"], "interimTranscript");
    assert_eq!(interim["transcript"], "quiero");
    assert!(server.fakes.coach.inputs.lock().is_empty());
}

#[tokio::test]
async fn test_invalid_message_keeps_connection_open() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;

    send_json(&mut client, json!({"type": "dance"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "Invalid message format");

    client
        .send(tungstenite::Message::Text("not json".into()))
        .await
        .unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["message"], "Invalid message format");

    start_session(&mut client).await;
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;
    start_session(&mut client).await;

    send_json(&mut client, json!({"type": "startStream", "userId": "u1"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "Stream already active");
    assert_eq!(server.fakes.transcription.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_user_reports_processing_failure() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;

    send_json(&mut client, json!({"type": "startStream", "userId": "ghost"})).await;
    assert_eq!(next_json(&mut client).await["type"], "streamReady");

    send_audio(&mut client, b"hola").await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "Failed to process response");
    assert!(error["details"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_sessions_are_registered_while_live() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;
    let session_id = start_session(&mut client).await;

    let summary = server.state.sessions.get(&session_id).unwrap();
    assert_eq!(summary.user_id, "u1");
    assert_eq!(summary.language, "es");

    send_json(&mut client, json!({"type": "stopStream"})).await;
    let sessions = server.state.sessions.clone();
    assert!(wait_until(|| sessions.is_empty()).await);

    // A stopped session can be restarted on the same connection
    let restarted = start_session(&mut client).await;
    assert_ne!(restarted, session_id);
}

#[tokio::test]
async fn test_closing_socket_releases_connection_slot() {
    let server = TestServer::start(test_config()).await;
    let mut client = server.connect().await;
    start_session(&mut client).await;
    assert_eq!(server.state.ws_connection_count(), 1);

    client.close(None).await.unwrap();
    drop(client);

    let state = server.state.clone();
    assert!(wait_until(|| state.ws_connection_count() == 0).await);
    assert!(wait_until(|| state.sessions.is_empty()).await);
}

#[tokio::test]
async fn test_per_ip_connection_limit() {
    let mut config = test_config();
    config.max_connections_per_ip = 1;
    let server = TestServer::start(config).await;

    let _first = server.connect().await;
    match connect_async(server.ws_url()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 429);
        }
        other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}
