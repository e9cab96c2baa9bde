use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Activity discriminator as sent by the agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Message,
    Event,
    EndOfConversation,
    /// `typing`, `trace`, ... carried through untouched.
    Other(String),
}

impl From<String> for ActivityType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "message" => Self::Message,
            "event" => Self::Event,
            "endOfConversation" => Self::EndOfConversation,
            _ => Self::Other(s),
        }
    }
}

impl From<ActivityType> for String {
    fn from(t: ActivityType) -> Self {
        match t {
            ActivityType::Message => "message".into(),
            ActivityType::Event => "event".into(),
            ActivityType::EndOfConversation => "endOfConversation".into(),
            ActivityType::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuggestedActions {
    #[serde(default)]
    pub actions: Vec<CardAction>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardAction {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// One event on a start or reply stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
}

impl Activity {
    fn bare(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            text: None,
            value_type: None,
            value: None,
            suggested_actions: None,
            conversation: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(ActivityType::Message)
        }
    }

    pub fn event(value_type: impl Into<String>, value: Value) -> Self {
        Self {
            value_type: Some(value_type.into()),
            value: Some(value),
            ..Self::bare(ActivityType::Event)
        }
    }

    pub fn end_of_conversation() -> Self {
        Self::bare(ActivityType::EndOfConversation)
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation = Some(ConversationAccount { id: id.into() });
        self
    }

    pub fn with_suggestions<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_actions = Some(SuggestedActions {
            actions: titles
                .into_iter()
                .map(|t| CardAction {
                    title: Some(t.into()),
                    value: None,
                })
                .collect(),
        });
        self
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    /// Titles of the suggested follow-up actions, if any.
    pub fn suggestion_titles(&self) -> impl Iterator<Item = &str> {
        self.suggested_actions
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| a.title.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_service_event_payload() {
        let raw = json!({
            "type": "event",
            "valueType": "DynamicPlanStepTriggered",
            "value": {"thought": "use calculator", "taskDialogId": "tool-1"},
            "conversation": {"id": "conv-9"},
            "channelData": {"ignored": true}
        });
        let activity: Activity = serde_json::from_value(raw).unwrap();
        assert_eq!(activity.activity_type, ActivityType::Event);
        assert_eq!(activity.value_type.as_deref(), Some("DynamicPlanStepTriggered"));
        assert_eq!(activity.conversation_id(), Some("conv-9"));
    }

    #[test]
    fn unknown_types_are_preserved() {
        let activity: Activity = serde_json::from_value(json!({"type": "typing"})).unwrap();
        assert_eq!(activity.activity_type, ActivityType::Other("typing".into()));
        let back = serde_json::to_value(&activity).unwrap();
        assert_eq!(back["type"], "typing");
    }

    #[test]
    fn end_of_conversation_uses_camel_case() {
        let activity: Activity =
            serde_json::from_value(json!({"type": "endOfConversation"})).unwrap();
        assert_eq!(activity.activity_type, ActivityType::EndOfConversation);
    }

    #[test]
    fn suggestion_titles_skip_untitled_actions() {
        let activity: Activity = serde_json::from_value(json!({
            "type": "message",
            "text": "hi",
            "suggestedActions": {"actions": [{"title": "Yes"}, {"value": 1}, {"title": "No"}]}
        }))
        .unwrap();
        let titles: Vec<_> = activity.suggestion_titles().collect();
        assert_eq!(titles, vec!["Yes", "No"]);
    }
}
