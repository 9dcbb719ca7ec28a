//! JSONL debug log of every valid bus event.
//!
//! Each process writes `events-<utc-timestamp>-<pid>.jsonl`, or a fixed
//! `events-dev.jsonl` in development mode. Pipelines share the process's
//! file through [`DebugEventLog::shared`]. Only the newest files are kept.
//! Logs can be read back and replayed into a pipeline.

use crate::config::DebugLogConfig;
use crate::error::PipelineError;
use agentbus_proto::BusEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const LOG_PREFIX: &str = "events-";
const LOG_EXTENSION: &str = ".jsonl";
pub const DEV_LOG_FILE: &str = "events-dev.jsonl";

/// Logs handed out by [`DebugEventLog::shared`], by directory and dev mode.
static SHARED_LOGS: OnceLock<Mutex<HashMap<(PathBuf, bool), Arc<DebugEventLog>>>> =
    OnceLock::new();

/// One line of the debug log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLogEntry {
    /// RFC 3339 timestamp of the event.
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub run_id: u64,
    pub data: Value,
}

impl DebugLogEntry {
    /// Captures a published event.
    pub fn from_event(event: &BusEvent) -> Result<Self, PipelineError> {
        let ts = DateTime::<Utc>::from_timestamp_millis(event.timestamp)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        Ok(Self {
            ts,
            event_type: event.event_type().to_string(),
            session_id: event.session_id.clone(),
            run_id: event.run_id,
            data: event.payload.data_json()?,
        })
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> Result<i64, PipelineError> {
        DateTime::parse_from_rfc3339(&self.ts)
            .map(|ts| ts.timestamp_millis())
            .map_err(|_| PipelineError::Timestamp(self.ts.clone()))
    }

    /// Rebuilds the logged event for replay.
    pub fn to_bus_event(&self) -> Result<BusEvent, PipelineError> {
        Ok(BusEvent::decode(
            self.session_id.clone(),
            self.run_id,
            self.timestamp_millis()?,
            &self.event_type,
            self.data.clone(),
        )?)
    }
}

/// Append-only writer for one debug log file.
#[derive(Debug)]
pub struct DebugEventLog {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl DebugEventLog {
    /// Returns the process-wide log for the configured directory.
    ///
    /// The first call opens the file and prunes old logs; later calls return
    /// the same handle, so every pipeline in the process writes one file.
    pub fn shared(config: &DebugLogConfig) -> Result<Arc<Self>, PipelineError> {
        let key = (config.resolved_dir(), config.dev_mode);
        let mut logs = SHARED_LOGS
            .get_or_init(Mutex::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(log) = logs.get(&key) {
            return Ok(Arc::clone(log));
        }
        let log = Arc::new(Self::open(config)?);
        logs.insert(key, Arc::clone(&log));
        Ok(log)
    }

    /// Creates a new log file and prunes old ones.
    ///
    /// Each call starts a new file (or empties the dev file). Pipelines use
    /// [`DebugEventLog::shared`] instead.
    pub fn open(config: &DebugLogConfig) -> Result<Self, PipelineError> {
        let dir = config.resolved_dir();
        fs::create_dir_all(&dir)?;

        let (path, file) = if config.dev_mode {
            let path = dir.join(DEV_LOG_FILE);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.set_len(0)?;
            (path, file)
        } else {
            let name = format!(
                "{LOG_PREFIX}{}-{}{LOG_EXTENSION}",
                Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
                std::process::id()
            );
            let path = dir.join(name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            (path, file)
        };

        let removed = prune_logs(&dir, config.retain.max(1))?;
        info!(path = %path.display(), removed, "Debug event log enabled");

        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    /// File this log writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event. Write failures are logged, not returned.
    pub fn append(&self, event: &BusEvent) {
        if let Err(err) = self.try_append(event) {
            warn!(path = %self.path.display(), error = %err, "Failed to write debug event");
        }
    }

    fn try_append(&self, event: &BusEvent) -> Result<(), PipelineError> {
        let line = serde_json::to_string(&DebugLogEntry::from_event(event)?)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        Ok(())
    }
}

/// Deletes all but the `retain` most recently modified log files.
fn prune_logs(dir: &Path, retain: usize) -> io::Result<usize> {
    let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with(LOG_PREFIX) && name.ends_with(LOG_EXTENSION)) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        logs.push((modified, entry.path()));
    }

    logs.sort_by(|a, b| b.cmp(a));
    let mut removed = 0;
    for (_, path) in logs.into_iter().skip(retain) {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed old debug event log");
                removed += 1;
            }
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "Failed to remove old debug event log"
            ),
        }
    }
    Ok(removed)
}

/// Reads every well-formed entry of a log. Malformed lines are skipped.
pub fn read_debug_log(path: &Path) -> Result<Vec<DebugLogEntry>, PipelineError> {
    read_debug_log_filtered(path, |_| true)
}

/// Reads the entries of a log that satisfy `filter`.
pub fn read_debug_log_filtered<F>(
    path: &Path,
    filter: F,
) -> Result<Vec<DebugLogEntry>, PipelineError>
where
    F: Fn(&DebugLogEntry) -> bool,
{
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DebugLogEntry>(&line) {
            Ok(entry) if filter(&entry) => entries.push(entry),
            Ok(_) => {}
            Err(err) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %err,
                "Skipping malformed debug log line"
            ),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_proto::{EventPayload, TextDeltaData, ToolStartData};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DebugLogConfig {
        DebugLogConfig {
            enabled: true,
            dir: Some(dir.path().to_path_buf()),
            dev_mode: false,
            retain: 10,
        }
    }

    fn delta(text: &str) -> BusEvent {
        BusEvent::new(
            "s1",
            2,
            EventPayload::TextDelta(TextDeltaData {
                delta: text.to_string(),
                message_id: "m".to_string(),
                agent_id: None,
            }),
        )
        .with_timestamp(1_700_000_000_123)
    }

    #[test]
    fn test_entry_format() {
        let entry = DebugLogEntry::from_event(&delta("hi")).unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "stream.text.delta");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["runId"], 2);
        assert_eq!(value["ts"], "2023-11-14T22:13:20.123Z");
        assert_eq!(value["data"]["delta"], "hi");
    }

    #[test]
    fn test_entry_replays_to_same_event() {
        let event = BusEvent::new(
            "s1",
            4,
            EventPayload::ToolStart(ToolStartData {
                tool_id: "t1".to_string(),
                tool_name: "edit".to_string(),
                tool_input: json!({"path": "src/lib.rs"}),
                parent_tool_call_id: None,
                parent_agent_id: Some("sub".to_string()),
            }),
        )
        .with_timestamp(1_700_000_000_000);
        let entry = DebugLogEntry::from_event(&event).unwrap();
        assert_eq!(entry.to_bus_event().unwrap(), event);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = DebugEventLog::open(&config(&dir)).unwrap();
        log.append(&delta("a"));
        log.append(&delta("b"));

        let entries = read_debug_log(log.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].data["delta"], "b");

        let name = log.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("events-"));
        assert!(name.ends_with(&format!("-{}.jsonl", std::process::id())));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events-manual.jsonl");
        let good =
            serde_json::to_string(&DebugLogEntry::from_event(&delta("ok")).unwrap()).unwrap();
        fs::write(&path, format!("{{not json\n\n{good}\n{{\"type\":1}}\n")).unwrap();

        let entries = read_debug_log(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data["delta"], "ok");
    }

    #[test]
    fn test_filtered_read() {
        let dir = TempDir::new().unwrap();
        let log = DebugEventLog::open(&config(&dir)).unwrap();
        log.append(&delta("a"));
        let mut other = delta("b");
        other.session_id = "s2".to_string();
        log.append(&other);

        let entries =
            read_debug_log_filtered(log.path(), |entry| entry.session_id == "s2").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data["delta"], "b");
    }

    #[test]
    fn test_dev_mode_truncates_fixed_file() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.dev_mode = true;

        let first = DebugEventLog::open(&config).unwrap();
        first.append(&delta("old"));
        drop(first);

        let second = DebugEventLog::open(&config).unwrap();
        assert_eq!(second.path(), dir.path().join(DEV_LOG_FILE));
        assert!(read_debug_log(second.path()).unwrap().is_empty());
    }

    #[test]
    fn test_shared_log_opened_once_per_directory() {
        let dir = TempDir::new().unwrap();
        let first = DebugEventLog::shared(&config(&dir)).unwrap();
        let second = DebugEventLog::shared(&config(&dir)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.append(&delta("a"));
        second.append(&delta("b"));
        let logs = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(logs, 1);
        assert_eq!(read_debug_log(first.path()).unwrap().len(), 2);

        let other = TempDir::new().unwrap();
        let elsewhere = DebugEventLog::shared(&config(&other)).unwrap();
        assert!(!Arc::ptr_eq(&first, &elsewhere));
    }

    #[test]
    fn test_dev_file_appends_after_reopen() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.dev_mode = true;

        let first = DebugEventLog::open(&config).unwrap();
        for text in ["a", "b", "c"] {
            first.append(&delta(text));
        }
        let second = DebugEventLog::open(&config).unwrap();
        second.append(&delta("d"));
        first.append(&delta("e"));

        let raw = fs::read(second.path()).unwrap();
        assert!(!raw.contains(&0));
        let deltas: Vec<String> = read_debug_log(second.path())
            .unwrap()
            .iter()
            .map(|entry| entry.data["delta"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(deltas, vec!["d", "e"]);
    }

    #[test]
    fn test_prunes_to_newest_files() {
        let dir = TempDir::new().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3_600);
        for i in 0..12_u64 {
            let path = dir.path().join(format!("events-2024010{i:02}.jsonl"));
            let file = File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let log = DebugEventLog::open(&config(&dir)).unwrap();

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".jsonl"))
            .collect();
        remaining.sort();
        assert_eq!(remaining.len(), 10);
        assert!(log.path().exists());
        assert!(!remaining.contains(&"events-202401000.jsonl".to_string()));
        assert!(!remaining.contains(&"events-202401002.jsonl".to_string()));
        assert!(remaining.contains(&"events-202401003.jsonl".to_string()));
        assert!(dir.path().join("notes.txt").exists());
    }
}
