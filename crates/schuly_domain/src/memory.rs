//! In-process stand-ins for the OS notification and permission subsystems.
//!
//! The desktop host has no alarm manager of its own, so it registers reminders
//! here and logs them. Both types are scriptable so callers can reproduce the
//! platform behaviours the scheduler and orchestrator must cope with.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{NotificationError, PermissionError};
use crate::notifications::{
    DeliveryMode, NotificationChannel, NotificationRequest, NotificationSink, PendingNotification,
};
use crate::permissions::{PermissionKind, PermissionPlatform, PermissionStatus, Platform};

#[derive(Debug, Default)]
struct CenterState {
    channels: Vec<NotificationChannel>,
    pending: BTreeMap<i32, PendingNotification>,
    shown: Vec<NotificationRequest>,
    exact_denied: bool,
    failing_ids: HashSet<i32>,
    fail_cancel: bool,
    cancel_all_calls: usize,
}

#[derive(Debug, Default)]
pub struct MemoryNotificationCenter {
    state: Mutex<CenterState>,
}

impl MemoryNotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects exact alarms the way Android 12+ does without the grant.
    pub fn deny_exact_alarms(&self, denied: bool) {
        self.state.lock().exact_denied = denied;
    }

    pub fn fail_schedule_for(&self, id: i32) {
        self.state.lock().failing_ids.insert(id);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.state.lock().fail_cancel = fail;
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.state.lock().channels.clone()
    }

    pub fn is_initialized(&self) -> bool {
        !self.state.lock().channels.is_empty()
    }

    pub fn shown(&self) -> Vec<NotificationRequest> {
        self.state.lock().shown.clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.state.lock().cancel_all_calls
    }
}

impl NotificationSink for MemoryNotificationCenter {
    fn initialize(&self, channel: &NotificationChannel) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        if !state.channels.iter().any(|known| known.id == channel.id) {
            debug!(channel = %channel.id, "registering notification channel");
            state.channels.push(channel.clone());
        }
        Ok(())
    }

    fn schedule(
        &self,
        notification: &NotificationRequest,
        mode: DeliveryMode,
    ) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        if !state.channels.iter().any(|c| c.id == notification.channel_id) {
            return Err(NotificationError::Platform(format!(
                "unknown channel `{}`",
                notification.channel_id
            )));
        }
        if state.failing_ids.contains(&notification.id) {
            return Err(NotificationError::Platform(format!(
                "alarm service rejected id {}",
                notification.id
            )));
        }
        if mode == DeliveryMode::Exact && state.exact_denied {
            return Err(NotificationError::ExactAlarmNotPermitted);
        }
        info!(
            id = notification.id,
            title = %notification.title,
            at = %notification.scheduled_for,
            ?mode,
            "reminder registered"
        );
        state.pending.insert(
            notification.id,
            PendingNotification {
                request: notification.clone(),
                mode,
            },
        );
        Ok(())
    }

    fn show(&self, notification: &NotificationRequest) -> Result<(), NotificationError> {
        info!(id = notification.id, title = %notification.title, body = %notification.body, "notification shown");
        self.state.lock().shown.push(notification.clone());
        Ok(())
    }

    fn cancel(&self, id: i32) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        if state.fail_cancel {
            return Err(NotificationError::Platform("cancel rejected".into()));
        }
        state.pending.remove(&id);
        Ok(())
    }

    fn cancel_all(&self) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        if state.fail_cancel {
            return Err(NotificationError::Platform("cancel rejected".into()));
        }
        state.cancel_all_calls += 1;
        state.pending.clear();
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError> {
        Ok(self.state.lock().pending.values().cloned().collect())
    }
}

/// Scriptable permission platform. Unset kinds report `NotRequested`.
#[derive(Debug)]
pub struct MemoryPermissions {
    platform: Platform,
    statuses: RwLock<HashMap<PermissionKind, PermissionStatus>>,
    request_answers: RwLock<HashMap<PermissionKind, PermissionStatus>>,
    query_failures: RwLock<HashSet<PermissionKind>>,
    request_failures: RwLock<HashSet<PermissionKind>>,
    requests: Mutex<Vec<PermissionKind>>,
    settings_opened: Mutex<usize>,
}

impl MemoryPermissions {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            statuses: RwLock::new(HashMap::new()),
            request_answers: RwLock::new(HashMap::new()),
            query_failures: RwLock::new(HashSet::new()),
            request_failures: RwLock::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            settings_opened: Mutex::new(0),
        }
    }

    pub fn set_status(&self, kind: PermissionKind, status: PermissionStatus) {
        self.statuses.write().insert(kind, status);
    }

    /// What the user answers when `kind` is requested.
    pub fn answer_requests(&self, kind: PermissionKind, status: PermissionStatus) {
        self.request_answers.write().insert(kind, status);
    }

    pub fn fail_queries_for(&self, kind: PermissionKind) {
        self.query_failures.write().insert(kind);
    }

    pub fn fail_requests_for(&self, kind: PermissionKind) {
        self.request_failures.write().insert(kind);
    }

    pub fn requests(&self) -> Vec<PermissionKind> {
        self.requests.lock().clone()
    }

    pub fn settings_opened(&self) -> usize {
        *self.settings_opened.lock()
    }

    fn ensure_supported(&self, kind: PermissionKind) -> Result<(), PermissionError> {
        if PermissionKind::for_platform(self.platform).contains(&kind) {
            Ok(())
        } else {
            Err(PermissionError::Unsupported(kind))
        }
    }
}

impl PermissionPlatform for MemoryPermissions {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn query(&self, kind: PermissionKind) -> Result<PermissionStatus, PermissionError> {
        self.ensure_supported(kind)?;
        if self.query_failures.read().contains(&kind) {
            return Err(PermissionError::Platform(format!("{} query crashed", kind.id())));
        }
        Ok(self
            .statuses
            .read()
            .get(&kind)
            .copied()
            .unwrap_or(PermissionStatus::NotRequested))
    }

    fn request(&self, kind: PermissionKind) -> Result<PermissionStatus, PermissionError> {
        self.requests.lock().push(kind);
        self.ensure_supported(kind)?;
        if self.request_failures.read().contains(&kind) {
            return Err(PermissionError::Platform(format!("{} request crashed", kind.id())));
        }
        let answer = self
            .request_answers
            .read()
            .get(&kind)
            .copied()
            .unwrap_or(PermissionStatus::Denied);
        self.statuses.write().insert(kind, answer);
        Ok(answer)
    }

    fn open_app_settings(&self) -> Result<(), PermissionError> {
        info!(platform = ?self.platform, "opening application settings");
        *self.settings_opened.lock() += 1;
        Ok(())
    }
}
