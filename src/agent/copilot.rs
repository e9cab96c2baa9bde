//! HTTPS client for the Copilot Studio conversations API.
//!
//! Both endpoints answer with a server-sent-event body whose `data:` lines
//! each carry one JSON activity.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde_json::json;
use tracing::debug;

use super::sse::{SseDecoder, SseEvent};
use super::{Activity, ActivityStream, AgentClient, ConversationStart, TokenProvider};
use crate::config::AgentConfig;
use crate::error::{BenchError, Result};

pub const API_VERSION: &str = "2022-03-01-preview";
const CONVERSATION_ID_HEADER: &str = "x-ms-conversationid";
const USER_AGENT_VALUE: &str = concat!("copilot-bench/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct CopilotSettings {
    /// `.../bots/{schemaName}` without a trailing slash.
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl CopilotSettings {
    pub fn from_config(agent: &AgentConfig) -> Result<Self> {
        let base_url = match &agent.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let environment_id = agent.environment_id.as_deref().ok_or_else(|| {
                    BenchError::config(format!(
                        "agent.environment_id is required ({})",
                        crate::config::ENV_ENVIRONMENT_ID
                    ))
                })?;
                let schema_name = agent.schema_name.as_deref().ok_or_else(|| {
                    BenchError::config(format!(
                        "agent.schema_name is required ({})",
                        crate::config::ENV_SCHEMA_NAME
                    ))
                })?;
                format!(
                    "https://{}/copilotstudio/dataverse-backed/authenticated/bots/{}",
                    environment_host(environment_id)?,
                    urlencoding::encode(schema_name)
                )
            }
        };
        Ok(Self {
            base_url,
            connect_timeout: Duration::from_secs(agent.connect_timeout_secs.max(1)),
        })
    }
}

/// Public-cloud API host for an environment id: dashes dropped, the last
/// two characters split into their own label.
pub fn environment_host(environment_id: &str) -> Result<String> {
    let id: String = environment_id
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if id.len() < 3 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BenchError::config(format!(
            "invalid environment id: {environment_id:?}"
        )));
    }
    let (prefix, suffix) = id.split_at(id.len() - 2);
    Ok(format!("{prefix}.{suffix}.environment.api.powerplatform.com"))
}

#[derive(Debug, Clone)]
pub struct CopilotStudioClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CopilotStudioClient {
    pub fn new(settings: CopilotSettings, token_provider: &TokenProvider) -> Result<Self> {
        let token = token_provider.resolve()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        default_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        // No overall timeout: a reply stream is consumed for as long as the
        // service keeps it open.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| BenchError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url,
            token,
        })
    }

    async fn post_stream(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<(HeaderMap, ActivityStream)> {
        debug!(url = %url, "posting conversation request");
        let response = self
            .client
            .post(url)
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BenchError::transport(format!("HTTP {status}: {text}")));
        }
        let headers = response.headers().clone();
        Ok((headers, sse_activities(response.bytes_stream())))
    }
}

#[async_trait]
impl AgentClient for CopilotStudioClient {
    async fn start_conversation(&self) -> Result<ConversationStart> {
        let url = format!("{}/conversations", self.base_url);
        let (headers, activities) = self
            .post_stream(&url, json!({ "emitStartConversationEvent": true }))
            .await
            .map_err(|e| BenchError::session(e.to_string()))?;
        let conversation_id_hint = headers
            .get(CONVERSATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ConversationStart {
            conversation_id_hint,
            activities,
        })
    }

    async fn ask_question(&self, query: &str, conversation_id: &str) -> Result<ActivityStream> {
        let url = format!(
            "{}/conversations/{}",
            self.base_url,
            urlencoding::encode(conversation_id)
        );
        let body = json!({
            "activity": {
                "type": "message",
                "text": query,
                "conversation": { "id": conversation_id },
            }
        });
        let (_, activities) = self.post_stream(&url, body).await?;
        Ok(activities)
    }
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<Activity>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn enqueue(&mut self, event: SseEvent) {
        match event.event.as_deref() {
            None | Some("activity") => {
                let parsed = serde_json::from_str::<Activity>(&event.data).map_err(|e| {
                    BenchError::InvalidEvent {
                        message: format!("{e}: {}", event.data),
                    }
                });
                self.pending.push_back(parsed);
            }
            Some(other) => debug!(event = other, "ignoring non-activity event"),
        }
    }
}

/// Decode a raw SSE byte stream into activities.
pub fn sse_activities<S, B, E>(bytes: S) -> ActivityStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.push(chunk.as_ref()) {
                        state.enqueue(event);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(BenchError::transport(format!("reply stream: {e}"))));
                }
                None => {
                    state.finished = true;
                    if let Some(event) = state.decoder.finish() {
                        state.enqueue(event);
                    }
                }
            }
        }
    }))
}
