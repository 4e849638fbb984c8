use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agenda::AgendaItem;
use crate::clock::Clock;
use crate::error::NotificationError;
use crate::notifications::{
    DeliveryMode, NotificationChannel, NotificationRequest, NotificationSink, PendingNotification,
    AGENDA_CHANNEL_ID,
};
use crate::settings::SettingsStore;

/// First id handed to lesson reminders; lower ids belong to other notification kinds.
pub const AGENDA_ID_BASE: i32 = 1000;
pub const TEST_NOTIFICATION_ID: i32 = 0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PassStatus {
    /// Push or agenda reminders are switched off; nothing was touched.
    Disabled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleReport {
    pub status: PassStatus,
    pub total: usize,
    pub scheduled: usize,
    /// Scheduled, but only after falling back to inexact delivery.
    pub downgraded: usize,
    pub expired: usize,
    pub unparseable: usize,
    pub failed: usize,
}

impl ScheduleReport {
    fn disabled(total: usize) -> Self {
        Self {
            status: PassStatus::Disabled,
            total,
            scheduled: 0,
            downgraded: 0,
            expired: 0,
            unparseable: 0,
            failed: 0,
        }
    }

    pub fn skipped(&self) -> usize {
        self.expired + self.unparseable + self.failed
    }
}

enum ItemOutcome {
    Scheduled(DeliveryMode),
    Expired,
    Unparseable,
    Failed,
}

pub struct NotificationScheduler {
    sink: Arc<dyn NotificationSink>,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
    channel: NotificationChannel,
}

impl NotificationScheduler {
    /// Registers the reminder channel; the returned scheduler is ready for use.
    pub fn start(
        sink: Arc<dyn NotificationSink>,
        settings: SettingsStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NotificationError> {
        let channel = NotificationChannel::agenda_reminders();
        sink.initialize(&channel)?;
        info!(channel = %channel.id, "notification subsystem ready");
        Ok(Self {
            sink,
            settings,
            clock,
            channel,
        })
    }

    /// Re-runs channel registration, which platforms treat as a no-op once done.
    pub fn is_ready(&self) -> bool {
        self.sink.initialize(&self.channel).is_ok()
    }

    /// Replaces every scheduled reminder with a fresh batch derived from `items`.
    #[instrument(skip_all, fields(items = items.len()))]
    pub fn schedule_all(&self, items: &[AgendaItem]) -> Result<ScheduleReport, NotificationError> {
        let settings = self.settings.load();
        if !settings.agenda_reminders_enabled() {
            debug!(
                push = settings.push_enabled,
                agenda = settings.agenda_enabled,
                "agenda reminders disabled; leaving schedule untouched"
            );
            return Ok(ScheduleReport::disabled(items.len()));
        }

        self.sink.cancel_all()?;

        let now = self.clock.now();
        let advance = Duration::minutes(i64::from(settings.advance_minutes));
        let mut report = ScheduleReport {
            status: PassStatus::Completed,
            total: items.len(),
            scheduled: 0,
            downgraded: 0,
            expired: 0,
            unparseable: 0,
            failed: 0,
        };

        for (index, item) in items.iter().enumerate() {
            let Some(id) = reminder_id(index) else {
                warn!(index, subject = %item.subject, "reminder id space exhausted");
                report.failed += 1;
                continue;
            };
            match self.schedule_item(id, item, now, advance) {
                ItemOutcome::Scheduled(mode) => {
                    report.scheduled += 1;
                    if mode == DeliveryMode::Inexact {
                        report.downgraded += 1;
                    }
                }
                ItemOutcome::Expired => report.expired += 1,
                ItemOutcome::Unparseable => report.unparseable += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            scheduled = report.scheduled,
            downgraded = report.downgraded,
            skipped = report.skipped(),
            advance_minutes = settings.advance_minutes,
            "agenda reminders scheduled"
        );
        Ok(report)
    }

    pub fn cancel_all(&self) -> Result<(), NotificationError> {
        self.sink.cancel_all()
    }

    pub fn pending(&self) -> Result<Vec<PendingNotification>, NotificationError> {
        self.sink.pending()
    }

    pub fn send_test_notification(&self) -> Result<(), NotificationError> {
        let request = NotificationRequest {
            id: TEST_NOTIFICATION_ID,
            title: "Test notification".to_string(),
            body: "Lesson reminders are working.".to_string(),
            scheduled_for: self.clock.now(),
            channel_id: self.channel.id.clone(),
            payload: None,
        };
        self.sink.show(&request)
    }

    fn schedule_item(
        &self,
        id: i32,
        item: &AgendaItem,
        now: NaiveDateTime,
        advance: Duration,
    ) -> ItemOutcome {
        let Some(start) = item.start_time() else {
            warn!(id, subject = %item.subject, raw = ?item.start, "skipping item without a usable start time");
            return ItemOutcome::Unparseable;
        };

        let notify_at = start - advance;
        if start.date() < now.date() || notify_at <= now {
            debug!(id, subject = %item.subject, %notify_at, "reminder time already passed");
            return ItemOutcome::Expired;
        }

        let request = NotificationRequest {
            id,
            title: item.subject.clone(),
            body: reminder_body(item),
            scheduled_for: notify_at,
            channel_id: AGENDA_CHANNEL_ID.to_string(),
            payload: Some(item.subject.clone()),
        };

        match self.sink.schedule(&request, DeliveryMode::Exact) {
            Ok(()) => ItemOutcome::Scheduled(DeliveryMode::Exact),
            Err(NotificationError::ExactAlarmNotPermitted) => {
                debug!(id, "exact alarms not permitted; retrying inexact");
                match self.sink.schedule(&request, DeliveryMode::Inexact) {
                    Ok(()) => ItemOutcome::Scheduled(DeliveryMode::Inexact),
                    Err(err) => {
                        warn!(id, subject = %item.subject, %err, "inexact scheduling failed");
                        ItemOutcome::Failed
                    }
                }
            }
            Err(err) => {
                warn!(id, subject = %item.subject, %err, "scheduling failed");
                ItemOutcome::Failed
            }
        }
    }
}

/// Id for the item at `index`, or `None` once ids would leave the `i32` range.
fn reminder_id(index: usize) -> Option<i32> {
    i32::try_from(index)
        .ok()
        .and_then(|offset| AGENDA_ID_BASE.checked_add(offset))
}

fn reminder_body(item: &AgendaItem) -> String {
    let room = item.room.trim();
    match (room.is_empty(), item.first_teacher()) {
        (false, Some(teacher)) => format!("{} - {}", room, teacher),
        (true, Some(teacher)) => teacher.to_string(),
        (_, None) => room.to_string(),
    }
}
