//! Session Streaming Integration Tests
//!
//! Fan-out to several subscribers over the channel transport, session
//! completion and the idle-session sweep.

use anyhow::Result;
use query_orchestrator::streaming::{to_sse_frame, SocketEnvelope};
use query_orchestrator::{
    ChannelTransport, SessionStreamBroadcaster, StreamEvent, StreamEventKind, StreamError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio_stream::StreamExt;

fn setup() -> (Arc<ChannelTransport>, Arc<SessionStreamBroadcaster>) {
    let transport = Arc::new(ChannelTransport::new());
    let broadcaster = Arc::new(SessionStreamBroadcaster::new(transport.clone()));
    (transport, broadcaster)
}

fn drain(rx: &mut Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_progress_fans_out_until_unsubscribe() -> Result<()> {
    let (transport, broadcaster) = setup();
    let mut first = transport.connect("client-1");
    let mut second = transport.connect("client-2");

    broadcaster.start_session("S1", Some("u-1".to_string()), "ws-1", "revenue?", 4)?;
    assert!(broadcaster.subscribe("S1", "client-1"));
    assert!(broadcaster.subscribe("S1", "client-2"));
    drain(&mut first);
    drain(&mut second);

    let delivered =
        broadcaster.emit_agent_progress("S1", "DatabaseExecutionAgent", "running SQL", None);
    assert_eq!(delivered, 2);
    assert_eq!(drain(&mut first).len(), 1);
    assert_eq!(drain(&mut second).len(), 1);

    assert!(broadcaster.unsubscribe("S1", "client-1"));
    let delivered =
        broadcaster.emit_agent_progress("S1", "DatabaseExecutionAgent", "running SQL", None);
    assert_eq!(delivered, 1);
    assert!(drain(&mut first).is_empty());

    let events = drain(&mut second);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, StreamEventKind::AgentProgress);
    assert_eq!(events[0].agent_name.as_deref(), Some("DatabaseExecutionAgent"));
    Ok(())
}

#[tokio::test]
async fn test_completing_every_agent_ends_session() -> Result<()> {
    let (transport, broadcaster) = setup();
    let mut rx = transport.connect("observer");

    broadcaster.start_session("S2", None, "ws-1", "revenue?", 2)?;
    assert!(broadcaster.subscribe("S2", "observer"));

    broadcaster.emit_agent_start("S2", "SynthesisAgent");
    broadcaster.emit_agent_complete("S2", "SynthesisAgent", json!({"success": true}));
    let halfway = broadcaster
        .get_session_context("S2")
        .expect("session still active");
    assert!((halfway.progress() - 0.5).abs() < f64::EPSILON);

    broadcaster.emit_agent_complete("S2", "VisualAgent", json!({"success": true}));

    let kinds: Vec<StreamEventKind> = drain(&mut rx).into_iter().map(|e| e.event_type).collect();
    assert_eq!(kinds.first(), Some(&StreamEventKind::ClientSubscribed));
    assert_eq!(kinds.last(), Some(&StreamEventKind::SessionEnd));
    assert_eq!(broadcaster.active_session_count(), 0);
    assert_eq!(broadcaster.emit_agent_start("S2", "late"), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_session_is_rejected() -> Result<()> {
    let (_transport, broadcaster) = setup();
    broadcaster.start_session("S3", None, "ws-1", "q", 3)?;

    let duplicate = broadcaster.start_session("S3", None, "ws-1", "q", 3);
    assert_eq!(
        duplicate.map(|_| ()),
        Err(StreamError::SessionExists("S3".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_disconnected_client_is_dropped_from_session() -> Result<()> {
    let (transport, broadcaster) = setup();
    let gone = transport.connect("gone");
    let mut alive = transport.connect("alive");

    broadcaster.start_session("S4", None, "ws-1", "q", 3)?;
    assert!(broadcaster.subscribe("S4", "gone"));
    assert!(broadcaster.subscribe("S4", "alive"));
    drop(gone);

    assert_eq!(broadcaster.emit_agent_start("S4", "GuardrailsAgent"), 1);
    assert_eq!(broadcaster.subscriber_count("S4"), 1);
    assert_eq!(drain(&mut alive).len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_task_expires_idle_sessions() -> Result<()> {
    let (transport, broadcaster) = setup();
    let mut rx = transport.connect("observer");
    broadcaster.start_session("S5", None, "ws-1", "q", 3)?;
    assert!(broadcaster.subscribe("S5", "observer"));

    let sweeper =
        broadcaster.spawn_cleanup_task(Duration::from_millis(20), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(broadcaster.active_session_count(), 0);
    let kinds: Vec<StreamEventKind> = drain(&mut rx).into_iter().map(|e| e.event_type).collect();
    assert_eq!(kinds.last(), Some(&StreamEventKind::SessionEnd));

    drop(broadcaster);
    tokio::time::timeout(Duration::from_secs(1), sweeper).await??;
    Ok(())
}

#[tokio::test]
async fn test_stream_consumer_sees_final_result_then_end() -> Result<()> {
    let (transport, broadcaster) = setup();
    let stream = transport.connect_stream("sse-client");

    broadcaster.start_session("S6", None, "ws-1", "q", 3)?;
    assert!(broadcaster.subscribe("S6", "sse-client"));
    broadcaster.emit_final_result("S6", json!({"content": "done", "success": true}));
    assert!(broadcaster.get_session_context("S6").is_none());
    transport.disconnect("sse-client");

    let frames: Vec<String> = stream
        .map(|event| to_sse_frame(&event))
        .collect::<Result<Vec<_>, _>>()
        .await?;
    assert_eq!(frames.len(), 3);
    assert!(frames[1].contains("\"final_result\""));
    assert!(frames.iter().all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));

    let envelope = SocketEnvelope::wrap(StreamEvent::new(StreamEventKind::SessionEnd, "S6"));
    let raw: serde_json::Value = serde_json::from_str(&envelope.to_json()?)?;
    assert_eq!(raw["type"], "stream_event");
    assert_eq!(raw["event"]["event_type"], "session_end");
    Ok(())
}
