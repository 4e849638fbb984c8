use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::PermissionError;
use crate::settings::SettingsStore;

pub const PROMPT_COOLDOWN_DAYS: i64 = 7;
pub const DEFAULT_SETTINGS_DELAY: StdDuration = StdDuration::from_secs(1);
pub const REQUEST_FAILED_MESSAGE: &str =
    "The permission could not be requested. Please enable it in the app settings.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionKind {
    Notification,
    ExactAlarm,
    BatteryOptimization,
    BackgroundActivity,
}

impl PermissionKind {
    /// Stable identifier, safe to persist or pass across an FFI boundary.
    pub fn id(self) -> &'static str {
        match self {
            PermissionKind::Notification => "notification",
            PermissionKind::ExactAlarm => "exact_alarm",
            PermissionKind::BatteryOptimization => "battery_optimization",
            PermissionKind::BackgroundActivity => "background_activity",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "notification" => Some(PermissionKind::Notification),
            "exact_alarm" => Some(PermissionKind::ExactAlarm),
            "battery_optimization" => Some(PermissionKind::BatteryOptimization),
            "background_activity" => Some(PermissionKind::BackgroundActivity),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PermissionKind::Notification => "Notifications",
            PermissionKind::ExactAlarm => "Exact alarms",
            PermissionKind::BatteryOptimization => "Battery optimization",
            PermissionKind::BackgroundActivity => "Background activity",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PermissionKind::Notification => "Required to show lesson reminders at all.",
            PermissionKind::ExactAlarm => {
                "Lets reminders fire at the exact minute instead of a delivery window."
            }
            PermissionKind::BatteryOptimization => {
                "Exempting the app keeps the system from delaying reminders to save power."
            }
            PermissionKind::BackgroundActivity => {
                "Some vendors restrict background work; allow it manually in the system settings."
            }
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            PermissionKind::Notification => "notifications",
            PermissionKind::ExactAlarm => "alarm",
            PermissionKind::BatteryOptimization => "battery_saver",
            PermissionKind::BackgroundActivity => "settings_applications",
        }
    }

    pub fn required(self) -> bool {
        matches!(self, PermissionKind::Notification)
    }

    pub fn recommended(self) -> bool {
        matches!(
            self,
            PermissionKind::ExactAlarm | PermissionKind::BatteryOptimization
        )
    }

    /// Kinds relevant on `platform`, in display order.
    pub fn for_platform(platform: Platform) -> &'static [PermissionKind] {
        match platform {
            Platform::Android => &[
                PermissionKind::Notification,
                PermissionKind::ExactAlarm,
                PermissionKind::BatteryOptimization,
                PermissionKind::BackgroundActivity,
            ],
            Platform::Ios | Platform::Desktop => &[PermissionKind::Notification],
        }
    }

    fn queryable(self) -> bool {
        !matches!(self, PermissionKind::BackgroundActivity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotRequested,
    /// The platform offers no query; treated as not granted, never shown as blocking.
    Unknown,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRecord {
    pub kind: PermissionKind,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub status: PermissionStatus,
    pub required: bool,
    pub recommended: bool,
}

impl PermissionRecord {
    fn new(kind: PermissionKind, status: PermissionStatus) -> Self {
        Self {
            kind,
            name: kind.display_name().to_string(),
            description: kind.description().to_string(),
            icon: kind.icon().to_string(),
            status,
            required: kind.required(),
            recommended: kind.recommended(),
        }
    }

    /// Missing and required: the UI renders these as blocking.
    pub fn is_blocking(&self) -> bool {
        self.required && !self.status.is_granted() && self.status != PermissionStatus::Unknown
    }
}

/// Platform permission API seam.
pub trait PermissionPlatform: Send + Sync {
    fn platform(&self) -> Platform;
    fn query(&self, kind: PermissionKind) -> Result<PermissionStatus, PermissionError>;
    fn request(&self, kind: PermissionKind) -> Result<PermissionStatus, PermissionError>;
    fn open_app_settings(&self) -> Result<(), PermissionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResolution {
    Granted,
    /// The user or the OS declined; the settings screen was offered instead.
    Denied,
    /// No request API exists for this kind; only the settings screen helps.
    ManualOnly,
    /// The platform call failed; `message` is meant for the user.
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub kind: PermissionKind,
    pub resolution: RequestResolution,
    pub opened_settings: bool,
    pub records: Vec<PermissionRecord>,
}

pub struct PermissionOrchestrator {
    platform: Arc<dyn PermissionPlatform>,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
    settings_delay: StdDuration,
}

impl PermissionOrchestrator {
    pub fn new(
        platform: Arc<dyn PermissionPlatform>,
        settings: SettingsStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            platform,
            settings,
            clock,
            settings_delay: DEFAULT_SETTINGS_DELAY,
        }
    }

    /// Pause before jumping to the system settings so an explanation can be read.
    pub fn with_settings_delay(mut self, delay: StdDuration) -> Self {
        self.settings_delay = delay;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform.platform()
    }

    pub fn refresh_status(&self) -> Vec<PermissionRecord> {
        PermissionKind::for_platform(self.platform.platform())
            .iter()
            .map(|&kind| PermissionRecord::new(kind, self.status_of(kind)))
            .collect()
    }

    pub fn status_of(&self, kind: PermissionKind) -> PermissionStatus {
        if !kind.queryable() {
            return PermissionStatus::Unknown;
        }
        match self.platform.query(kind) {
            Ok(status) => status,
            Err(err) => {
                warn!(permission = kind.id(), %err, "permission query failed");
                PermissionStatus::Unknown
            }
        }
    }

    pub fn request_permission(&self, kind: PermissionKind) -> RequestOutcome {
        info!(permission = kind.id(), "requesting permission");
        let (resolution, opened_settings) = if !kind.queryable() {
            (RequestResolution::ManualOnly, self.open_settings_after_delay())
        } else {
            match self.platform.request(kind) {
                Ok(PermissionStatus::Granted) => (RequestResolution::Granted, false),
                Ok(status) => {
                    debug!(permission = kind.id(), ?status, "request declined; offering settings");
                    (RequestResolution::Denied, self.open_settings_after_delay())
                }
                Err(err) => {
                    warn!(permission = kind.id(), %err, "permission request failed");
                    (
                        RequestResolution::Failed {
                            message: REQUEST_FAILED_MESSAGE.to_string(),
                        },
                        self.open_settings_after_delay(),
                    )
                }
            }
        };
        RequestOutcome {
            kind,
            resolution,
            opened_settings,
            records: self.refresh_status(),
        }
    }

    /// Whether the permission modal should be shown now. Records the time when it says yes.
    pub fn should_prompt(&self) -> bool {
        let now = self.clock.now();
        if !self.status_of(PermissionKind::Notification).is_granted() {
            self.remember_prompt(now);
            return true;
        }

        let settings = self.settings.load();
        if !(settings.push_enabled && settings.any_category_enabled()) {
            return false;
        }

        let due = match settings.last_permission_prompt {
            None => true,
            Some(last) => now - last > Duration::days(PROMPT_COOLDOWN_DAYS),
        };
        if due {
            self.remember_prompt(now);
        }
        due
    }

    /// True when every required permission is granted.
    pub fn are_permissions_granted(&self) -> bool {
        let records = self.refresh_status();
        for record in records.iter().filter(|r| r.recommended && !r.status.is_granted()) {
            warn!(permission = record.kind.id(), status = ?record.status, "recommended permission missing");
        }
        records
            .iter()
            .filter(|record| record.required)
            .all(|record| record.status.is_granted())
    }

    fn remember_prompt(&self, now: chrono::NaiveDateTime) {
        if let Err(err) = self.settings.record_permission_prompt(now) {
            warn!(%err, "unable to persist permission prompt time");
        }
    }

    fn open_settings_after_delay(&self) -> bool {
        if !self.settings_delay.is_zero() {
            thread::sleep(self.settings_delay);
        }
        match self.platform.open_app_settings() {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "unable to open application settings");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryPermissions;
    use chrono::{NaiveDate, NaiveDateTime};

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn orchestrator(
        platform: Platform,
    ) -> (
        PermissionOrchestrator,
        Arc<MemoryPermissions>,
        Arc<FixedClock>,
        SettingsStore,
    ) {
        let permissions = Arc::new(MemoryPermissions::new(platform));
        let clock = Arc::new(FixedClock::new(noon()));
        let settings = SettingsStore::in_memory();
        let orchestrator =
            PermissionOrchestrator::new(permissions.clone(), settings.clone(), clock.clone())
                .with_settings_delay(StdDuration::ZERO);
        (orchestrator, permissions, clock, settings)
    }

    #[test]
    fn android_reports_all_four_permissions() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        perms.set_status(PermissionKind::Notification, PermissionStatus::Granted);
        perms.set_status(PermissionKind::ExactAlarm, PermissionStatus::Denied);

        let records = orch.refresh_status();
        let kinds: Vec<PermissionKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, PermissionKind::for_platform(Platform::Android).to_vec());
        assert_eq!(records[0].status, PermissionStatus::Granted);
        assert!(records[0].required);
        assert_eq!(records[1].status, PermissionStatus::Denied);
        assert!(records[1].recommended && !records[1].required);
        assert_eq!(records[2].status, PermissionStatus::NotRequested);
        assert_eq!(records[3].status, PermissionStatus::Unknown);
        assert!(!records[3].is_blocking());
    }

    #[test]
    fn ios_only_reports_notification_permission() {
        let (orch, _, _, _) = orchestrator(Platform::Ios);
        let records = orch.refresh_status();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, PermissionKind::Notification);
        assert!(records[0].is_blocking());
    }

    #[test]
    fn android_only_kinds_are_unsupported_on_ios() {
        let (orch, perms, _, _) = orchestrator(Platform::Ios);
        assert_eq!(
            perms.query(PermissionKind::ExactAlarm),
            Err(PermissionError::Unsupported(PermissionKind::ExactAlarm))
        );
        assert_eq!(orch.status_of(PermissionKind::ExactAlarm), PermissionStatus::Unknown);

        let outcome = orch.request_permission(PermissionKind::BatteryOptimization);
        assert_eq!(
            outcome.resolution,
            RequestResolution::Failed {
                message: REQUEST_FAILED_MESSAGE.to_string()
            }
        );
        assert!(outcome.opened_settings);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn failing_query_maps_to_unknown_without_aborting() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        perms.fail_queries_for(PermissionKind::ExactAlarm);
        perms.set_status(PermissionKind::BatteryOptimization, PermissionStatus::Granted);
        let records = orch.refresh_status();
        assert_eq!(records[1].status, PermissionStatus::Unknown);
        assert_eq!(records[2].status, PermissionStatus::Granted);
    }

    #[test]
    fn granted_request_refreshes_without_settings() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        perms.answer_requests(PermissionKind::Notification, PermissionStatus::Granted);
        let outcome = orch.request_permission(PermissionKind::Notification);
        assert_eq!(outcome.resolution, RequestResolution::Granted);
        assert!(!outcome.opened_settings);
        assert_eq!(outcome.records[0].status, PermissionStatus::Granted);
        assert_eq!(perms.settings_opened(), 0);
    }

    #[test]
    fn denied_request_falls_back_to_settings() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        let outcome = orch.request_permission(PermissionKind::ExactAlarm);
        assert_eq!(outcome.resolution, RequestResolution::Denied);
        assert!(outcome.opened_settings);
        assert_eq!(perms.requests(), vec![PermissionKind::ExactAlarm]);
        assert_eq!(perms.settings_opened(), 1);
    }

    #[test]
    fn failed_request_surfaces_message_and_opens_settings() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        perms.fail_requests_for(PermissionKind::BatteryOptimization);
        let outcome = orch.request_permission(PermissionKind::BatteryOptimization);
        assert_eq!(
            outcome.resolution,
            RequestResolution::Failed {
                message: REQUEST_FAILED_MESSAGE.to_string()
            }
        );
        assert!(outcome.opened_settings);
    }

    #[test]
    fn background_activity_goes_straight_to_settings() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        let outcome = orch.request_permission(PermissionKind::BackgroundActivity);
        assert_eq!(outcome.resolution, RequestResolution::ManualOnly);
        assert!(perms.requests().is_empty());
        assert_eq!(perms.settings_opened(), 1);
    }

    #[test]
    fn prompts_when_notification_permission_missing() {
        let (orch, perms, _, settings) = orchestrator(Platform::Android);
        assert!(orch.should_prompt());
        assert_eq!(settings.last_permission_prompt(), Some(noon()));

        perms.set_status(PermissionKind::Notification, PermissionStatus::Granted);
        assert!(!orch.should_prompt());
    }

    #[test]
    fn unknown_notification_status_counts_as_missing() {
        let (orch, perms, _, _) = orchestrator(Platform::Desktop);
        perms.fail_queries_for(PermissionKind::Notification);
        assert!(orch.should_prompt());
        assert!(orch.should_prompt());
    }

    #[test]
    fn granted_permission_respects_weekly_cooldown() {
        let (orch, perms, clock, settings) = orchestrator(Platform::Android);
        perms.set_status(PermissionKind::Notification, PermissionStatus::Granted);

        assert!(orch.should_prompt(), "never shown before");
        assert!(!orch.should_prompt(), "shown moments ago");

        clock.advance(Duration::days(7));
        assert!(!orch.should_prompt(), "exactly seven days is still inside the window");

        clock.advance(Duration::minutes(1));
        assert!(orch.should_prompt());
        assert_eq!(settings.last_permission_prompt(), Some(clock.now()));
    }

    #[test]
    fn no_prompt_when_every_category_is_off() {
        let (orch, perms, _, settings) = orchestrator(Platform::Android);
        perms.set_status(PermissionKind::Notification, PermissionStatus::Granted);
        settings.set_agenda_enabled(false).unwrap();
        settings.set_grades_enabled(false).unwrap();
        settings.set_absences_enabled(false).unwrap();
        assert!(!orch.should_prompt());
        assert_eq!(settings.last_permission_prompt(), None);
    }

    #[test]
    fn exact_alarm_denial_does_not_block() {
        let (orch, perms, _, _) = orchestrator(Platform::Android);
        perms.set_status(PermissionKind::Notification, PermissionStatus::Granted);
        perms.set_status(PermissionKind::ExactAlarm, PermissionStatus::Denied);
        assert!(orch.are_permissions_granted());

        perms.set_status(PermissionKind::Notification, PermissionStatus::Denied);
        assert!(!orch.are_permissions_granted());
    }

    #[test]
    fn identifiers_round_trip() {
        for &kind in PermissionKind::for_platform(Platform::Android) {
            assert_eq!(PermissionKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(PermissionKind::from_id("Benachrichtigungen"), None);
    }
}
