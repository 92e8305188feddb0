//! Local debug log of API calls.
//!
//! Keeps the most recent entries in a bounded ring buffer, mirrors each entry
//! to `tracing`, and persists the buffer through [`KeyValueStorage`] so it can
//! be inspected after a restart. Persistence is best-effort.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::storage::{KeyValueStorage, API_LOG_KEY};

/// Number of entries retained
pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub action: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_id: Option<String>,
}

/// Identifies what an API call was about, for correlating log entries
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext<'a> {
    pub user_id: Option<&'a str>,
    pub qr_id: Option<&'a str>,
}

pub struct ApiLog {
    storage: Arc<dyn KeyValueStorage>,
    component: String,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl ApiLog {
    /// Open the log, picking up entries persisted by earlier runs
    pub fn new(storage: Arc<dyn KeyValueStorage>, component: impl Into<String>) -> Self {
        let entries = match storage.get(API_LOG_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<VecDeque<LogEntry>>(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable API log");
                VecDeque::new()
            }),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "API log storage unavailable");
                VecDeque::new()
            }
        };

        Self {
            storage,
            component: component.into(),
            entries: Mutex::new(entries),
        }
    }

    /// Record the start, success or failure of an API call
    pub fn log_api_call(
        &self,
        endpoint: &str,
        method: &str,
        request: Option<&serde_json::Value>,
        response: Option<&serde_json::Value>,
        failure: Option<&dyn std::fmt::Display>,
        context: CallContext<'_>,
    ) {
        let details = serde_json::json!({
            "endpoint": endpoint,
            "method": method,
            "requestData": request,
            "responseData": response,
            "hasError": failure.is_some(),
        });

        self.record(LogEntry {
            timestamp: Utc::now(),
            level: if failure.is_some() { LogLevel::Error } else { LogLevel::Info },
            component: self.component.clone(),
            action: format!("API_{}", method.to_uppercase()),
            message: format!("{} {}", method, endpoint),
            details: Some(details),
            error: failure.map(|e| e.to_string()),
            user_id: context.user_id.map(str::to_string),
            qr_id: context.qr_id.map(str::to_string),
        });
    }

    pub fn record(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => debug!(component = %entry.component, action = %entry.action, "{}", entry.message),
            LogLevel::Info => info!(component = %entry.component, action = %entry.action, "{}", entry.message),
            LogLevel::Warn => warn!(component = %entry.component, action = %entry.action, "{}", entry.message),
            LogLevel::Error => error!(
                component = %entry.component,
                action = %entry.action,
                error = entry.error.as_deref().unwrap_or(""),
                "{}",
                entry.message
            ),
        }

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        self.persist(&entries);
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
        if let Err(e) = self.storage.remove(API_LOG_KEY) {
            warn!(error = %e, "Failed to clear stored API log");
        }
    }

    fn persist(&self, entries: &VecDeque<LogEntry>) {
        let result = serde_json::to_string(entries)
            .map_err(|e| e.to_string())
            .and_then(|raw| self.storage.set(API_LOG_KEY, &raw).map_err(|e| e.to_string()));
        if let Err(e) = result {
            debug!(error = %e, "Failed to persist API log");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
