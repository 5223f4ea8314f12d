//! Chat message model and draft validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RoomError;

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// Message delivery scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Exact match only: "Public" or " public" are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// One entry of a private message's recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub user_id: String,
}

/// An accepted, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub visibility: Visibility,
    pub target: Option<Vec<Target>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build an accepted message with a fresh id and timestamp.
    pub fn new(
        room_id: &str,
        sender_id: &str,
        content: String,
        visibility: Visibility,
        target: Option<Vec<Target>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            visibility,
            target,
            created_at: Utc::now(),
        }
    }

    /// Whether `user_id` is an explicit recipient. Exact, case-sensitive match.
    pub fn targets(&self, user_id: &str) -> bool {
        self.target
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|t| t.user_id == user_id)
    }
}

/// A message as received from a client, before validation.
///
/// Every field stays raw JSON so that validation can run in a fixed order
/// regardless of what the client sent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDraft {
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub visibility: serde_json::Value,
    #[serde(default)]
    pub target: serde_json::Value,
}

impl MessageDraft {
    pub fn visibility(&self) -> Result<Visibility, RoomError> {
        self.visibility
            .as_str()
            .and_then(Visibility::parse)
            .ok_or(RoomError::InvalidVisibility)
    }

    pub fn content(&self) -> Result<String, RoomError> {
        let content = self
            .content
            .as_str()
            .ok_or(RoomError::InvalidMessage("content must be a string"))?
            .trim();
        if content.is_empty() {
            return Err(RoomError::InvalidMessage("content is empty"));
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(RoomError::InvalidMessage("content is too long"));
        }
        Ok(content.to_string())
    }

    /// Private messages need at least one recipient; public ones carry none.
    pub fn target_for(&self, visibility: Visibility) -> Result<Option<Vec<Target>>, RoomError> {
        if visibility == Visibility::Public {
            return Ok(None);
        }
        if self.target.is_null() {
            return Err(RoomError::InvalidMessage("private message needs a target"));
        }
        let target: Vec<Target> = serde_json::from_value(self.target.clone())
            .map_err(|_| RoomError::InvalidMessage("target must be a list of users"))?;
        if target.is_empty() {
            return Err(RoomError::InvalidMessage("private message needs a target"));
        }
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(content: serde_json::Value, visibility: serde_json::Value) -> MessageDraft {
        MessageDraft {
            content,
            visibility,
            target: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_visibility_is_exact() {
        assert_eq!(Visibility::parse("public"), Some(Visibility::Public));
        assert_eq!(Visibility::parse("private"), Some(Visibility::Private));
        assert_eq!(Visibility::parse("Public"), None);
        assert_eq!(Visibility::parse("everyone"), None);
    }

    #[test]
    fn test_non_string_visibility_rejected() {
        let d = draft(json!("hi"), json!(1));
        assert_eq!(d.visibility(), Err(RoomError::InvalidVisibility));
        let d = draft(json!("hi"), serde_json::Value::Null);
        assert_eq!(d.visibility(), Err(RoomError::InvalidVisibility));
    }

    #[test]
    fn test_content_rules() {
        assert_eq!(draft(json!("  hello "), json!("public")).content().unwrap(), "hello");
        assert!(draft(json!("   "), json!("public")).content().is_err());
        assert!(draft(json!(42), json!("public")).content().is_err());
        let long = "x".repeat(MAX_CONTENT_LENGTH + 1);
        assert!(draft(json!(long), json!("public")).content().is_err());
    }

    #[test]
    fn test_private_requires_target() {
        let mut d = draft(json!("psst"), json!("private"));
        assert!(d.target_for(Visibility::Private).is_err());
        d.target = json!([]);
        assert!(d.target_for(Visibility::Private).is_err());
        d.target = json!([{"userId": "b"}]);
        assert_eq!(d.target_for(Visibility::Private).unwrap().unwrap().len(), 1);
        assert_eq!(d.target_for(Visibility::Public).unwrap(), None);
    }

    #[test]
    fn test_malformed_target_is_invalid_message() {
        let mut d = draft(json!("psst"), json!("private"));
        for bad in [json!("u3"), json!([{"id": "u3"}]), json!({"userId": "u3"}), json!([7])] {
            d.target = bad;
            assert_eq!(
                d.target_for(Visibility::Private),
                Err(RoomError::InvalidMessage("target must be a list of users"))
            );
        }
        // Public messages never look at the target
        d.target = json!("u3");
        assert_eq!(d.target_for(Visibility::Public).unwrap(), None);
    }

    #[test]
    fn test_malformed_target_still_decodes() {
        let d: MessageDraft = serde_json::from_value(
            json!({"content": "hi", "visibility": "bogus", "target": "u3"}),
        )
        .unwrap();
        assert_eq!(d.visibility(), Err(RoomError::InvalidVisibility));
    }

    #[test]
    fn test_targets_is_exact_match() {
        let msg = Message::new(
            "r1",
            "a",
            "hi".into(),
            Visibility::Private,
            Some(vec![Target { user_id: "Bob".into() }]),
        );
        assert!(msg.targets("Bob"));
        assert!(!msg.targets("bob"));
        assert!(!msg.targets("Bo"));
    }
}
