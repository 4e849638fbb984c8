use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    agenda::AgendaItem,
    clock::{Clock, SystemClock},
    notifications::NotificationSink,
    permissions::{PermissionOrchestrator, PermissionPlatform, PermissionRecord},
    scheduler::{NotificationScheduler, ScheduleReport},
    settings::{KeyValueStore, MemoryStore, Settings, SettingsStore},
};

/// Wires settings, reminder scheduling and permission gating behind app lifecycle hooks.
pub struct SchulyService {
    settings: SettingsStore,
    scheduler: NotificationScheduler,
    permissions: PermissionOrchestrator,
    agenda: RwLock<Vec<AgendaItem>>,
}

pub struct SchulyServiceBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    notification_sink: Option<Arc<dyn NotificationSink>>,
    permission_platform: Option<Arc<dyn PermissionPlatform>>,
    clock: Option<Arc<dyn Clock>>,
    settings_delay: Option<Duration>,
}

impl SchulyServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            notification_sink: None,
            permission_platform: None,
            clock: None,
            settings_delay: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    pub fn with_permission_platform(mut self, platform: Arc<dyn PermissionPlatform>) -> Self {
        self.permission_platform = Some(platform);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_settings_delay(mut self, delay: Duration) -> Self {
        self.settings_delay = Some(delay);
        self
    }

    /// Starts the notification subsystem; fails if the platform refuses to initialize.
    pub fn build(self) -> Result<SchulyService> {
        let sink = self
            .notification_sink
            .ok_or_else(|| anyhow!("a notification sink is required"))?;
        let platform = self
            .permission_platform
            .ok_or_else(|| anyhow!("a permission platform is required"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let settings = SettingsStore::new(store);
        let scheduler = NotificationScheduler::start(sink, settings.clone(), clock.clone())
            .context("failed to initialize notification subsystem")?;
        let mut permissions = PermissionOrchestrator::new(platform, settings.clone(), clock);
        if let Some(delay) = self.settings_delay {
            permissions = permissions.with_settings_delay(delay);
        }

        info!(platform = ?permissions.platform(), "schuly service ready");
        Ok(SchulyService {
            settings,
            scheduler,
            permissions,
            agenda: RwLock::new(Vec::new()),
        })
    }
}

impl Default for SchulyServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchulyService {
    pub fn builder() -> SchulyServiceBuilder {
        SchulyServiceBuilder::new()
    }

    pub fn settings(&self) -> Settings {
        self.settings.load()
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn permissions(&self) -> &PermissionOrchestrator {
        &self.permissions
    }

    pub fn agenda(&self) -> Vec<AgendaItem> {
        self.agenda.read().clone()
    }

    /// Foreground/resume hook. Returns the records to show when the permission modal is due.
    pub fn on_resume(&self) -> Option<Vec<PermissionRecord>> {
        if self.permissions.should_prompt() {
            let records = self.permissions.refresh_status();
            debug!(count = records.len(), "permission modal due");
            Some(records)
        } else {
            None
        }
    }

    /// Stores the fresh agenda and rebuilds reminders from it.
    pub fn refresh_agenda(&self, items: Vec<AgendaItem>) -> Result<ScheduleReport> {
        *self.agenda.write() = items;
        self.reschedule()
    }

    /// Persists the toggle; switching off clears every reminder, switching on rebuilds them.
    pub fn set_push_enabled(&self, enabled: bool) -> Result<Option<ScheduleReport>> {
        self.settings
            .set_push_enabled(enabled)
            .context("unable to persist push setting")?;
        if enabled {
            self.reschedule().map(Some)
        } else {
            self.scheduler
                .cancel_all()
                .context("unable to clear scheduled reminders")?;
            info!("push notifications disabled; reminders cleared");
            Ok(None)
        }
    }

    pub fn set_advance_minutes(&self, minutes: u32) -> Result<ScheduleReport> {
        let stored = self
            .settings
            .set_advance_minutes(minutes)
            .context("unable to persist advance minutes")?;
        debug!(minutes = stored, "advance minutes updated");
        self.reschedule()
    }

    fn reschedule(&self) -> Result<ScheduleReport> {
        let items = self.agenda.read().clone();
        self.scheduler
            .schedule_all(&items)
            .context("agenda reminder pass failed")
    }
}
