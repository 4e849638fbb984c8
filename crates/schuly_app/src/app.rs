use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use schuly_domain::{
    agenda,
    memory::{MemoryNotificationCenter, MemoryPermissions},
    notifications::NotificationSink,
    permissions::{PermissionKind, PermissionRecord, PermissionStatus, Platform, RequestResolution},
    scheduler::ScheduleReport,
    settings::JsonFileStore,
    SchulyService,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) agenda_path: Option<PathBuf>,
    pub(crate) settings_path: PathBuf,
    pub(crate) platform: Platform,
    pub(crate) watch: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("SCHULY_AGENDA") {
            if !path.trim().is_empty() {
                config.agenda_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SCHULY_SETTINGS") {
            if !path.trim().is_empty() {
                config.settings_path = PathBuf::from(path);
            }
        }
        if let Ok(name) = std::env::var("SCHULY_PLATFORM") {
            match parse_platform(&name) {
                Some(platform) => config.platform = platform,
                None => warn!(value = %name, "unknown SCHULY_PLATFORM; keeping desktop"),
            }
        }
        if let Ok(flag) = std::env::var("SCHULY_WATCH") {
            config.watch = parse_flag(&flag);
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agenda_path: None,
            settings_path: PathBuf::from("schuly-settings.json"),
            platform: Platform::Desktop,
            watch: false,
        }
    }
}

fn parse_platform(raw: &str) -> Option<Platform> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "android" => Some(Platform::Android),
        "ios" => Some(Platform::Ios),
        "desktop" | "linux" | "macos" | "windows" => Some(Platform::Desktop),
        _ => None,
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Host-side permission state: the desktop has nothing to grant, mobile simulations start unanswered.
fn host_permissions(platform: Platform) -> MemoryPermissions {
    let permissions = MemoryPermissions::new(platform);
    if platform == Platform::Desktop {
        permissions.set_status(PermissionKind::Notification, PermissionStatus::Granted);
    }
    for &kind in PermissionKind::for_platform(platform) {
        permissions.answer_requests(kind, PermissionStatus::Granted);
    }
    permissions
}

pub fn run(config: AppConfig) -> Result<()> {
    info!(
        platform = ?config.platform,
        settings = %config.settings_path.display(),
        "starting schuly host"
    );
    let store = JsonFileStore::open(&config.settings_path).with_context(|| {
        format!(
            "unable to open settings file {}",
            config.settings_path.display()
        )
    })?;
    let center = Arc::new(MemoryNotificationCenter::new());
    let service = SchulyService::builder()
        .with_store(Arc::new(store))
        .with_notification_sink(center.clone())
        .with_permission_platform(Arc::new(host_permissions(config.platform)))
        .build()
        .context("failed to initialize schuly service")?;

    if let Some(records) = service.on_resume() {
        resolve_permissions(&service, &records);
    }

    let Some(agenda_path) = config.agenda_path.as_deref() else {
        info!("no agenda export configured; set SCHULY_AGENDA to schedule reminders");
        return Ok(());
    };

    reload_agenda(&service, agenda_path)?;
    log_pending(&*center);

    if config.watch {
        watch_agenda(&service, agenda_path, &*center)?;
    }
    Ok(())
}

fn resolve_permissions(service: &SchulyService, records: &[PermissionRecord]) {
    for record in records {
        info!(
            permission = record.kind.id(),
            status = ?record.status,
            required = record.required,
            recommended = record.recommended,
            "{}",
            record.description
        );
    }
    let missing = records
        .iter()
        .filter(|r| (r.required || r.recommended) && !r.status.is_granted());
    for record in missing {
        let outcome = service.permissions().request_permission(record.kind);
        match outcome.resolution {
            RequestResolution::Granted => info!(permission = record.kind.id(), "permission granted"),
            RequestResolution::Failed { message } => {
                warn!(permission = record.kind.id(), "{}", message)
            }
            other => warn!(
                permission = record.kind.id(),
                resolution = ?other,
                opened_settings = outcome.opened_settings,
                "permission still missing"
            ),
        }
    }
}

fn reload_agenda(service: &SchulyService, path: &Path) -> Result<ScheduleReport> {
    let items = agenda::load_agenda(path)?;
    let report = service.refresh_agenda(items)?;
    info!(
        path = %path.display(),
        total = report.total,
        scheduled = report.scheduled,
        downgraded = report.downgraded,
        expired = report.expired,
        unparseable = report.unparseable,
        failed = report.failed,
        "agenda refreshed"
    );
    Ok(report)
}

fn log_pending(center: &dyn NotificationSink) {
    match center.pending() {
        Ok(pending) => {
            for entry in pending {
                info!(
                    id = entry.request.id,
                    at = %entry.request.scheduled_for,
                    mode = ?entry.mode,
                    "{}: {}",
                    entry.request.title,
                    entry.request.body
                );
            }
        }
        Err(err) => warn!(%err, "unable to list pending reminders"),
    }
}

/// Reschedules whenever the agenda export is rewritten. Runs until the watcher disconnects.
fn watch_agenda(service: &SchulyService, path: &Path, center: &dyn NotificationSink) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    })?;
    // Editors often replace the file, so watch its directory.
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching agenda export");

    for res in rx {
        match res {
            Ok(event) if is_agenda_change(&event, path) => {
                debug!(?event, "agenda export changed");
                match reload_agenda(service, path) {
                    Ok(_) => log_pending(center),
                    Err(err) => warn!(error = %format!("{err:#}"), "agenda reload failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "file watcher error"),
        }
    }
    Ok(())
}

fn is_agenda_change(event: &notify::Event, path: &Path) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    let Some(name) = path.file_name() else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|candidate| candidate.file_name() == Some(name))
}
