use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One lesson or event from the school timetable, as delivered by the agenda endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    #[serde(default, alias = "text")]
    pub subject: String,
    #[serde(default, alias = "roomToken")]
    pub room: String,
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default, alias = "startDate")]
    pub start: Option<String>,
    #[serde(default, alias = "endDate")]
    pub end: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl AgendaItem {
    pub fn new(subject: impl Into<String>, room: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            subject: subject.into(),
            room: room.into(),
            start: Some(start.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ..Self::default()
        }
    }

    pub fn with_teacher(mut self, teacher: impl Into<String>) -> Self {
        self.teachers.push(teacher.into());
        self
    }

    /// Start of the lesson in local wall-clock time, if the raw timestamp parses.
    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.start.as_deref().and_then(parse_timestamp)
    }

    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.end.as_deref().and_then(parse_timestamp)
    }

    pub fn first_teacher(&self) -> Option<&str> {
        self.teachers
            .iter()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
    }
}

/// Parses the timestamp shapes the agenda endpoint has been seen to emit.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Local).naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

pub fn parse_agenda(json: &str) -> Result<Vec<AgendaItem>> {
    serde_json::from_str(json).context("agenda payload is not a list of agenda items")
}

pub fn load_agenda(path: impl AsRef<Path>) -> Result<Vec<AgendaItem>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("unable to read agenda export {}", path.display()))?;
    parse_agenda(&raw)
}

/// Items starting at or after `now`, earliest first.
pub fn upcoming(items: &[AgendaItem], now: NaiveDateTime) -> Vec<&AgendaItem> {
    let mut entries: Vec<(NaiveDateTime, &AgendaItem)> = items
        .iter()
        .filter_map(|item| item.start_time().map(|start| (start, item)))
        .filter(|(start, _)| *start >= now)
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.subject.cmp(&b.1.subject)));
    entries.into_iter().map(|(_, item)| item).collect()
}
