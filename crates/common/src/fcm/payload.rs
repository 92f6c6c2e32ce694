//! FCM HTTP v1 request and response bodies.

use crate::domain::{AndroidPriority, PushMessage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
pub struct FcmMessage<'a> {
    pub token: &'a str,
    pub notification: FcmNotification<'a>,
    pub data: &'a BTreeMap<String, String>,
    pub android: AndroidConfig<'a>,
    pub apns: ApnsConfig<'a>,
}

#[derive(Debug, Serialize)]
pub struct FcmNotification<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AndroidConfig<'a> {
    pub priority: AndroidPriority,
    pub notification: AndroidNotification<'a>,
}

#[derive(Debug, Serialize)]
pub struct AndroidNotification<'a> {
    pub channel_id: &'a str,
    pub sound: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ApnsConfig<'a> {
    pub payload: ApnsPayload<'a>,
}

#[derive(Debug, Serialize)]
pub struct ApnsPayload<'a> {
    pub aps: Aps<'a>,
}

#[derive(Debug, Serialize)]
pub struct Aps<'a> {
    pub sound: &'a str,
    pub badge: u32,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'a str>,
}

impl<'a> SendRequest<'a> {
    pub fn from_message(message: &'a PushMessage) -> Self {
        let hints = &message.hints;
        Self {
            message: FcmMessage {
                token: &message.token,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
                data: &message.data,
                android: AndroidConfig {
                    priority: hints.android.priority,
                    notification: AndroidNotification {
                        channel_id: &hints.android.channel_id,
                        sound: &hints.android.sound,
                        color: hints.android.color.as_deref(),
                    },
                },
                apns: ApnsConfig {
                    payload: ApnsPayload {
                        aps: Aps {
                            sound: &hints.apns.sound,
                            badge: hints.apns.badge,
                            content_available: hints.apns.content_available.then_some(1),
                            category: hints.apns.category.as_deref(),
                        },
                    },
                },
            },
        }
    }
}

/// Successful send: `name` is `projects/{project}/messages/{id}`
#[derive(Debug, Deserialize)]
pub struct SendResponse {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(default)]
    pub error_code: Option<String>,
}

impl ErrorBody {
    /// The FCM-specific code when present, otherwise the RPC status
    pub fn code(&self) -> Option<String> {
        self.details
            .iter()
            .find_map(|d| d.error_code.clone())
            .or_else(|| self.status.clone())
    }
}
