use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_CHANNEL_ID: &str = "mybus_notifications";
pub const STUDENT_CHANNEL_ID: &str = "student_notifications";
pub const COMPLAINTS_CHANNEL_ID: &str = "complaints_channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AndroidPriority {
    #[default]
    Normal,
    High,
}

/// Android-specific delivery hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidHints {
    pub priority: AndroidPriority,
    pub channel_id: String,
    pub sound: String,
    pub color: Option<String>,
}

impl Default for AndroidHints {
    fn default() -> Self {
        Self {
            priority: AndroidPriority::High,
            channel_id: DEFAULT_CHANNEL_ID.to_string(),
            sound: "default".to_string(),
            color: None,
        }
    }
}

/// APNs-specific delivery hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsHints {
    pub sound: String,
    pub badge: u32,
    pub content_available: bool,
    pub category: Option<String>,
}

impl Default for ApnsHints {
    fn default() -> Self {
        Self {
            sound: "default".to_string(),
            badge: 1,
            content_available: false,
            category: None,
        }
    }
}

/// Delivery hints shared by every message of one notification kind
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryHints {
    pub android: AndroidHints,
    pub apns: ApnsHints,
}

impl DeliveryHints {
    /// Plain hints on a given Android channel
    pub fn channel(channel_id: &str) -> Self {
        Self {
            android: AndroidHints {
                channel_id: channel_id.to_string(),
                ..AndroidHints::default()
            },
            apns: ApnsHints::default(),
        }
    }

    /// Rich hints used by complaint and student-update messages
    pub fn custom_sound(channel_id: &str, color: &str, category: &str) -> Self {
        Self {
            android: AndroidHints {
                priority: AndroidPriority::High,
                channel_id: channel_id.to_string(),
                sound: "notification_sound".to_string(),
                color: Some(color.to_string()),
            },
            apns: ApnsHints {
                sound: "notification_sound.mp3".to_string(),
                badge: 1,
                content_available: true,
                category: Some(category.to_string()),
            },
        }
    }
}

/// A fully addressed push message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub hints: DeliveryHints,
}

/// Failure reported by a push provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PushError {
    pub message: String,
    pub code: Option<String>,
}

impl PushError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// Push-notification delivery provider
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send one message; returns the provider's message id
    async fn send(&self, message: PushMessage) -> Result<String, PushError>;
}
