//! Client-facing messages and their conversion to model messages.

use repochat_provider::Message;
use serde::{Deserialize, Serialize};

/// Role of a client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    User,
    Assistant,
    System,
}

/// A part of a client message. Only text is carried into model history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// A message as the client holds it.
///
/// Clients send either `parts` or a bare `content` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: UiRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UiMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: UiRole::User,
            parts: vec![UiPart::Text { text: text.into() }],
            content: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: UiRole::Assistant,
            ..Self::user(text)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The message text: `content` if present, else the text parts joined.
    pub fn text(&self) -> String {
        if let Some(content) = &self.content {
            return content.clone();
        }
        self.parts
            .iter()
            .filter_map(|part| match part {
                UiPart::Text { text } => Some(text.as_str()),
                UiPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Convert client messages to model history, dropping ones without text.
pub fn to_model_messages(messages: &[UiMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|message| {
            let text = message.text();
            if text.trim().is_empty() {
                return None;
            }
            Some(match message.role {
                UiRole::User => Message::user(text),
                UiRole::Assistant => Message::assistant(text),
                UiRole::System => Message::system(text),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use repochat_provider::Role;

    #[test]
    fn test_parse_parts_and_content() {
        let messages: Vec<UiMessage> = serde_json::from_str(
            r#"[
                {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "clone "}, {"type": "text", "text": "a/b"}]},
                {"id": "m2", "role": "assistant", "parts": [{"type": "step-start"}, {"type": "text", "text": "Cloned."}, {"type": "tool-git_clone", "state": "output-available"}]},
                {"role": "user", "content": "list files in b"}
            ]"#,
        )
        .unwrap();

        assert_eq!(messages[0].text(), "clone a/b");
        assert_eq!(messages[1].text(), "Cloned.");
        assert_eq!(messages[2].text(), "list files in b");

        let history = to_model_messages(&messages);
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[2].text(), "list files in b");
    }

    #[test]
    fn test_empty_messages_are_dropped() {
        let messages = vec![
            UiMessage::user("  "),
            UiMessage {
                id: None,
                role: UiRole::Assistant,
                parts: vec![UiPart::Other],
                content: None,
            },
            UiMessage::user("hi"),
        ];
        let history = to_model_messages(&messages);
        assert_eq!(history, vec![Message::user("hi")]);
    }

    #[test]
    fn test_user_message_wire_format() {
        let value = serde_json::to_value(UiMessage::user("hi").with_id("m1")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"id": "m1", "role": "user", "parts": [{"type": "text", "text": "hi"}]})
        );
    }
}
