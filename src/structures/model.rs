use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Online,
    Offline,
    Checking,
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Online => "online",
            Status::Offline => "offline",
            Status::Checking => "checking",
            Status::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub url: String,
    pub status: Status,
}

/// A row the scraper gave up on, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: String,
}

/// One calendar day of alerting state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(rename = "alertedOffline", default)]
    pub alerted_offline: Vec<String>,
    #[serde(rename = "sentAllClear", default)]
    pub sent_all_clear: bool,
}

/// Raw attributes of a row's status badge as read from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusIndicator {
    pub text: String,
    pub class_attr: String,
    pub outer_markup: String,
    pub nested_icon: Option<Box<StatusIndicator>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSnapshot {
    pub url_text: String,
    pub indicator: StatusIndicator,
}
