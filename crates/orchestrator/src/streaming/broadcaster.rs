//! Session Stream Broadcaster
//!
//! Owns streaming sessions and their subscriber sets and fans lifecycle
//! events out through a [`StreamTransport`]. Events are never buffered: a
//! client that subscribes late only sees what is emitted afterwards.

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::events::{StreamEvent, StreamEventKind, StreamingContext, ALL_AGENTS};
use super::transport::StreamTransport;
use crate::config::StreamingConfig;
use crate::error::StreamError;

struct SessionState {
    context: StreamingContext,
    subscribers: HashSet<String>,
    started_at: Instant,
}

pub struct SessionStreamBroadcaster {
    transport: Arc<dyn StreamTransport>,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionStreamBroadcaster {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session. Duplicate ids are rejected.
    pub fn start_session(
        &self,
        session_id: &str,
        user_id: Option<String>,
        workspace_id: &str,
        query: &str,
        total_agents: usize,
    ) -> Result<StreamingContext, StreamError> {
        let context = StreamingContext {
            session_id: session_id.to_string(),
            user_id,
            workspace_id: workspace_id.to_string(),
            query: query.to_string(),
            start_time: Utc::now(),
            total_agents,
            completed_agents: 0,
        };

        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(session_id) {
                return Err(StreamError::SessionExists(session_id.to_string()));
            }
            sessions.insert(
                session_id.to_string(),
                SessionState {
                    context: context.clone(),
                    subscribers: HashSet::new(),
                    started_at: Instant::now(),
                },
            );
        }

        info!(session_id = %session_id, total_agents, "Streaming session started");
        self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::SessionStart, session_id)
                .with_data(json!({"query": query, "total_agents": total_agents}))
                .with_progress(0.0),
        );
        Ok(context)
    }

    /// Add a client to a session; false when the session does not exist or
    /// the client cannot be reached.
    pub fn subscribe(&self, session_id: &str, client_id: &str) -> bool {
        let context = {
            let mut sessions = self.sessions.write();
            let Some(state) = sessions.get_mut(session_id) else {
                debug!(session_id = %session_id, client_id = %client_id, "Subscribe to unknown session");
                return false;
            };
            state.subscribers.insert(client_id.to_string());
            state.context.clone()
        };

        // The acknowledgement carries the session metadata, since
        // `session_start` goes out before anyone can subscribe.
        let event = StreamEvent::new(StreamEventKind::ClientSubscribed, session_id)
            .with_data(json!({
                "client_id": client_id,
                "query": context.query,
                "workspace_id": context.workspace_id,
                "total_agents": context.total_agents,
                "completed_agents": context.completed_agents,
            }))
            .with_progress(context.progress());
        if let Err(e) = self.transport.deliver(client_id, &event) {
            warn!(session_id = %session_id, client_id = %client_id, error = %e, "Subscription acknowledgement failed");
            self.drop_clients(session_id, &[client_id.to_string()]);
            return false;
        }

        debug!(session_id = %session_id, client_id = %client_id, "Client subscribed");
        true
    }

    pub fn unsubscribe(&self, session_id: &str, client_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .get_mut(session_id)
            .map(|state| state.subscribers.remove(client_id))
            .unwrap_or(false);
        if removed {
            debug!(session_id = %session_id, client_id = %client_id, "Client unsubscribed");
        }
        removed
    }

    pub fn emit_agent_start(&self, session_id: &str, agent_name: &str) -> usize {
        let Some(progress) = self.progress_of(session_id) else {
            return 0;
        };
        self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::AgentStart, session_id)
                .with_agent(agent_name)
                .with_progress(progress),
        )
    }

    pub fn emit_agent_progress(
        &self,
        session_id: &str,
        agent_name: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> usize {
        let Some(progress) = self.progress_of(session_id) else {
            return 0;
        };
        self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::AgentProgress, session_id)
                .with_agent(agent_name)
                .with_data(json!({"message": message, "details": data}))
                .with_progress(progress),
        )
    }

    /// Count one more completed agent. Reaching the session's total emits the
    /// all-complete event and ends the session.
    pub fn emit_agent_complete(
        &self,
        session_id: &str,
        agent_name: &str,
        summary: serde_json::Value,
    ) -> usize {
        let (progress, complete) = {
            let mut sessions = self.sessions.write();
            let Some(state) = sessions.get_mut(session_id) else {
                return 0;
            };
            let context = &mut state.context;
            context.completed_agents = (context.completed_agents + 1).min(context.total_agents);
            (context.progress(), context.is_complete())
        };

        let reached = self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::AgentComplete, session_id)
                .with_agent(agent_name)
                .with_data(summary)
                .with_progress(progress),
        );

        if complete {
            self.broadcast(
                session_id,
                StreamEvent::new(StreamEventKind::AgentComplete, session_id)
                    .with_agent(ALL_AGENTS)
                    .with_data(json!({"message": "All agents completed"}))
                    .with_progress(1.0),
            );
            self.end_session(session_id);
        }

        reached
    }

    pub fn emit_agent_error(&self, session_id: &str, agent_name: &str, error: &str) -> usize {
        let Some(progress) = self.progress_of(session_id) else {
            return 0;
        };
        self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::AgentError, session_id)
                .with_agent(agent_name)
                .with_data(json!({"error": error}))
                .with_progress(progress),
        )
    }

    /// Emit the terminal payload, then end the session.
    pub fn emit_final_result(&self, session_id: &str, result: serde_json::Value) -> usize {
        if self.progress_of(session_id).is_none() {
            return 0;
        }
        let reached = self.broadcast(
            session_id,
            StreamEvent::new(StreamEventKind::FinalResult, session_id)
                .with_data(result)
                .with_progress(1.0),
        );
        self.end_session(session_id);
        reached
    }

    /// Remove a session, telling its subscribers. No-op for unknown ids.
    pub fn end_session(&self, session_id: &str) {
        let Some(state) = self.sessions.write().remove(session_id) else {
            return;
        };

        let event = StreamEvent::new(StreamEventKind::SessionEnd, session_id)
            .with_data(json!({"completed_agents": state.context.completed_agents}))
            .with_progress(state.context.progress());
        for client_id in &state.subscribers {
            if let Err(e) = self.transport.deliver(client_id, &event) {
                debug!(session_id = %session_id, client_id = %client_id, error = %e, "Session end not delivered");
            }
        }

        info!(
            session_id = %session_id,
            completed_agents = state.context.completed_agents,
            total_agents = state.context.total_agents,
            duration_ms = state.started_at.elapsed().as_millis() as u64,
            "Streaming session ended"
        );
    }

    /// Remove sessions older than `max_age`; returns how many were removed.
    pub fn cleanup_inactive_sessions(&self, max_age: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, state)| state.started_at.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            warn!(session_id = %session_id, "Expiring inactive streaming session");
            self.end_session(session_id);
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "Inactive streaming sessions cleaned up");
        }
        expired.len()
    }

    /// Periodic sweep; the task exits once the broadcaster is dropped.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        let broadcaster: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(broadcaster) = broadcaster.upgrade() else {
                    debug!("Broadcaster dropped, stopping session sweep");
                    break;
                };
                broadcaster.cleanup_inactive_sessions(max_age);
            }
        })
    }

    /// [`spawn_cleanup_task`](Self::spawn_cleanup_task) driven by the
    /// configured sweep interval and idle timeout.
    pub fn spawn_cleanup_task_from(self: &Arc<Self>, config: &StreamingConfig) -> JoinHandle<()> {
        info!(
            sweep_interval_ms = config.sweep_interval_ms,
            session_idle_timeout_ms = config.session_idle_timeout_ms,
            "Starting streaming session sweep"
        );
        self.spawn_cleanup_task(config.sweep_interval(), config.session_idle_timeout())
    }

    pub fn get_session_context(&self, session_id: &str) -> Option<StreamingContext> {
        self.sessions
            .read()
            .get(session_id)
            .map(|state| state.context.clone())
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|state| state.subscribers.len())
            .unwrap_or(0)
    }

    fn progress_of(&self, session_id: &str) -> Option<f64> {
        self.sessions
            .read()
            .get(session_id)
            .map(|state| state.context.progress())
    }

    /// Deliver to the current subscribers; failed clients are removed.
    fn broadcast(&self, session_id: &str, event: StreamEvent) -> usize {
        let subscribers: Vec<String> = match self.sessions.read().get(session_id) {
            Some(state) => state.subscribers.iter().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for client_id in subscribers {
            match self.transport.deliver(&client_id, &event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session_id = %session_id, client_id = %client_id, error = %e, "Event delivery failed, removing client");
                    failed.push(client_id);
                }
            }
        }

        if !failed.is_empty() {
            self.drop_clients(session_id, &failed);
        }

        debug!(
            session_id = %session_id,
            event = event.event_type.as_str(),
            delivered,
            "Stream event broadcast"
        );
        delivered
    }

    fn drop_clients(&self, session_id: &str, clients: &[String]) {
        if let Some(state) = self.sessions.write().get_mut(session_id) {
            for client_id in clients {
                state.subscribers.remove(client_id);
            }
        }
    }
}
