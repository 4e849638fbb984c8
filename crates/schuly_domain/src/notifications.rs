use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::NotificationError;

pub const AGENDA_CHANNEL_ID: &str = "agenda_reminders";

/// Vibration pattern for lesson reminders, alternating wait/vibrate in milliseconds.
pub const REMINDER_VIBRATION_MS: [u64; 4] = [0, 500, 250, 500];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Importance {
    Default,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
    pub sound: bool,
    pub vibration_pattern: Vec<u64>,
}

impl NotificationChannel {
    pub fn agenda_reminders() -> Self {
        Self {
            id: AGENDA_CHANNEL_ID.to_string(),
            name: "Lesson reminders".to_string(),
            description: "Alerts shortly before a lesson starts".to_string(),
            importance: Importance::High,
            sound: true,
            vibration_pattern: REMINDER_VIBRATION_MS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Fires at the requested instant; needs the exact-alarm grant on Android.
    Exact,
    /// Best-effort delivery window chosen by the OS.
    Inexact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub id: i32,
    pub title: String,
    pub body: String,
    /// Local wall-clock fire time.
    pub scheduled_for: NaiveDateTime,
    pub channel_id: String,
    pub payload: Option<String>,
}

/// A request the platform still holds, together with how it was registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingNotification {
    pub request: NotificationRequest,
    pub mode: DeliveryMode,
}

/// Platform-specific notification adapters will implement this trait.
pub trait NotificationSink: Send + Sync {
    /// Registers the channel and prepares the subsystem. Must be idempotent.
    fn initialize(&self, channel: &NotificationChannel) -> Result<(), NotificationError>;
    fn schedule(
        &self,
        notification: &NotificationRequest,
        mode: DeliveryMode,
    ) -> Result<(), NotificationError>;
    /// Displays a notification immediately.
    fn show(&self, notification: &NotificationRequest) -> Result<(), NotificationError>;
    fn cancel(&self, id: i32) -> Result<(), NotificationError>;
    fn cancel_all(&self) -> Result<(), NotificationError>;
    fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError>;
}
