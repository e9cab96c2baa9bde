//! Agent client boundary: the remote conversational service the replay
//! loop talks to.

pub mod activity;
pub mod auth;
pub mod copilot;
pub mod sse;

pub use activity::{Activity, ActivityType};
pub use auth::TokenProvider;
pub use copilot::{CopilotSettings, CopilotStudioClient};

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Stream of activities for one request, ended by the server closing it.
pub type ActivityStream = Pin<Box<dyn Stream<Item = Result<Activity>> + Send>>;

/// A freshly opened conversation.
pub struct ConversationStart {
    /// Conversation id reported outside the activity payloads (e.g. a
    /// response header), used when no activity carries one.
    pub conversation_id_hint: Option<String>,
    pub activities: ActivityStream,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Open a session. The stream yields the greeting and suggested actions.
    async fn start_conversation(&self) -> Result<ConversationStart>;

    /// Submit one query within an open session.
    async fn ask_question(&self, query: &str, conversation_id: &str) -> Result<ActivityStream>;
}
