//! Structured runner logging: a sink interface with composable sinks.
//!
//! Console logging stays on `tracing`; these sinks additionally persist
//! newline-delimited JSON records (`{timestamp, level, message, context}`)
//! and buffer them in memory for tests and dashboard consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl LogRecord {
    pub fn new(level: &str, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
            context,
        }
    }
}

/// A structured log destination. Sinks must never panic or block for long;
/// a failed write is reported once through tracing and dropped.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Appends ndjson records to a file.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn emit(&self, record: &LogRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping unserializable log record: {}", e);
                return;
            }
        };
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!("Log file write failed: {}", e);
            }
        }
    }
}

/// Buffers records in memory; used by tests and the dashboard feed.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Fans one record out to several sinks.
pub struct MultiSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for MultiSink {
    fn emit(&self, record: &LogRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}

/// The runner's logging facade: tracing for the console plus whatever
/// sink composition the configuration selected.
#[derive(Clone)]
pub struct RunnerLogger {
    sink: Arc<dyn LogSink>,
}

impl RunnerLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// A logger that only logs to the console.
    pub fn console_only() -> Self {
        struct NullSink;
        impl LogSink for NullSink {
            fn emit(&self, _record: &LogRecord) {}
        }
        Self {
            sink: Arc::new(NullSink),
        }
    }

    pub fn info(&self, message: &str, context: serde_json::Value) {
        tracing::info!("{}", message);
        self.sink.emit(&LogRecord::new("info", message, context));
    }

    pub fn warn(&self, message: &str, context: serde_json::Value) {
        tracing::warn!("{}", message);
        self.sink.emit(&LogRecord::new("warn", message, context));
    }

    pub fn error(&self, message: &str, context: serde_json::Value) {
        tracing::error!("{}", message);
        self.sink.emit(&LogRecord::new("error", message, context));
    }
}

/// Reads the last `limit` records from an ndjson log file, optionally
/// filtered by level. Malformed lines are skipped.
pub fn tail_log(path: &Path, limit: usize, level: Option<&str>) -> std::io::Result<Vec<LogRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records: Vec<LogRecord> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<LogRecord>(&line) {
            if level.map(|l| record.level == l).unwrap_or(true) {
                records.push(record);
            }
        }
    }
    let skip = records.len().saturating_sub(limit);
    Ok(records.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_sink_writes_ndjson() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.log");
        let sink = FileSink::open(&path).unwrap();
        sink.emit(&LogRecord::new(
            "info",
            "task started",
            serde_json::json!({"task": "aaaa1111"}),
        ));
        sink.emit(&LogRecord::new("warn", "slow poll", serde_json::Value::Null));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: LogRecord = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first.message, "task started");
        assert_eq!(first.context["task"], "aaaa1111");
    }

    #[test]
    fn tail_filters_by_level_and_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.log");
        let sink = FileSink::open(&path).unwrap();
        for i in 0..5 {
            sink.emit(&LogRecord::new(
                "info",
                format!("info {i}"),
                serde_json::Value::Null,
            ));
        }
        sink.emit(&LogRecord::new("error", "boom", serde_json::Value::Null));

        let tail = tail_log(&path, 3, None).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[2].message, "boom");

        let errors = tail_log(&path, 10, Some("error")).unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn multi_sink_fans_out() {
        let memory_a = Arc::new(MemorySink::new());
        let memory_b = Arc::new(MemorySink::new());
        let multi = MultiSink::new(vec![memory_a.clone(), memory_b.clone()]);
        let logger = RunnerLogger::new(Arc::new(multi));
        logger.info("hello", serde_json::Value::Null);
        assert_eq!(memory_a.snapshot().len(), 1);
        assert_eq!(memory_b.snapshot().len(), 1);
    }
}
