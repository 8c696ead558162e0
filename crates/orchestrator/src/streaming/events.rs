//! Stream event types and wire formats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Agent name carried by the synthetic event emitted when every agent of a
/// session has completed
pub const ALL_AGENTS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    AgentStart,
    AgentProgress,
    AgentComplete,
    AgentError,
    FinalResult,
    SessionStart,
    SessionEnd,
    ClientSubscribed,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::AgentStart => "agent_start",
            StreamEventKind::AgentProgress => "agent_progress",
            StreamEventKind::AgentComplete => "agent_complete",
            StreamEventKind::AgentError => "agent_error",
            StreamEventKind::FinalResult => "final_result",
            StreamEventKind::SessionStart => "session_start",
            StreamEventKind::SessionEnd => "session_end",
            StreamEventKind::ClientSubscribed => "client_subscribed",
        }
    }
}

/// One progress event of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Session progress, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl StreamEvent {
    pub fn new(event_type: StreamEventKind, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            agent_name: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
            progress: None,
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }
}

/// Server-sent-events frame: `data: <json>\n\n`
pub fn to_sse_frame(event: &StreamEvent) -> Result<String, TransportError> {
    let json =
        serde_json::to_string(event).map_err(|e| TransportError::Encoding(e.to_string()))?;
    Ok(format!("data: {json}\n\n"))
}

/// Message shape for socket transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub session_id: String,
    pub event: StreamEvent,
    pub timestamp: DateTime<Utc>,
}

impl SocketEnvelope {
    pub fn wrap(event: StreamEvent) -> Self {
        Self {
            message_type: "stream_event".to_string(),
            session_id: event.session_id.clone(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Encoding(e.to_string()))
    }
}

/// Live state of one streaming session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub workspace_id: String,
    pub query: String,
    pub start_time: DateTime<Utc>,
    pub total_agents: usize,
    /// Never exceeds `total_agents`
    pub completed_agents: usize,
}

impl StreamingContext {
    pub fn progress(&self) -> f64 {
        if self.total_agents == 0 {
            return 1.0;
        }
        self.completed_agents as f64 / self.total_agents as f64
    }

    pub fn is_complete(&self) -> bool {
        self.completed_agents >= self.total_agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_snake_case_type() {
        let event = StreamEvent::new(StreamEventKind::AgentStart, "S1").with_agent("GuardrailsAgent");
        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["event_type"], "agent_start");
        assert_eq!(value["agent_name"], "GuardrailsAgent");
        assert!(value.get("progress").is_none());
    }

    #[test]
    fn test_sse_frame() {
        let event = StreamEvent::new(StreamEventKind::AgentProgress, "S1")
            .with_data(json!({"message": "halfway"}))
            .with_progress(1.5);
        let frame = to_sse_frame(&event).expect("frame");
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));

        let decoded: StreamEvent =
            serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).expect("decode");
        assert_eq!(decoded.progress, Some(1.0));
    }

    #[test]
    fn test_socket_envelope_shape() {
        let envelope = SocketEnvelope::wrap(StreamEvent::new(StreamEventKind::SessionEnd, "S9"));
        let value: serde_json::Value =
            serde_json::from_str(&envelope.to_json().expect("encode")).expect("json");
        assert_eq!(value["type"], "stream_event");
        assert_eq!(value["session_id"], "S9");
        assert_eq!(value["event"]["event_type"], "session_end");
    }

    #[test]
    fn test_progress_of_empty_session() {
        let context = StreamingContext {
            session_id: "S".to_string(),
            user_id: None,
            workspace_id: "ws".to_string(),
            query: "q".to_string(),
            start_time: Utc::now(),
            total_agents: 0,
            completed_agents: 0,
        };
        assert_eq!(context.progress(), 1.0);
        assert!(context.is_complete());
    }
}
