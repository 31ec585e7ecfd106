// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Append-only command log.
//!
//! Every command is recorded as `timestamp;speed;voltage` with two decimal
//! places, whether or not delivery succeeded: the log is an audit of intent,
//! not of confirmed hardware state.  The history reader feeds the graphing
//! side and skips rows it cannot parse.

use derive_new::new;
use log::*;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, new)]
pub struct LogRecord {
    pub timestamp: String,
    pub speed_kmh: f64,
    pub voltage: f64,
}

#[derive(Debug, Clone)]
pub struct CommandLog {
    path: PathBuf,
}

impl CommandLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record, creating the log directory on first use.
    pub fn append(&self, speed_kmh: f64, voltage: f64) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{};{:.2};{:.2}",
            time::now().rfc3339(),
            speed_kmh,
            voltage
        )
    }

    /// Read the whole history back, skipping malformed rows.
    pub fn history(&self) -> io::Result<Vec<LogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            match parse_row(&line) {
                Some(record) => records.push(record),
                None => debug!("skipping malformed log row: {:?}", line),
            }
        }
        Ok(records)
    }
}

fn parse_row(line: &str) -> Option<LogRecord> {
    let mut fields = line.split(';');
    let timestamp = fields.next()?.to_string();
    let speed_kmh = fields.next()?.parse().ok()?;
    let voltage = fields.next()?.parse().ok()?;
    Some(LogRecord::new(timestamp, speed_kmh, voltage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new(dir.path().join("logs").join("commands.csv"));

        log.append(10.0, 10.0).unwrap();
        log.append(0.0, 0.0).unwrap();

        let records = log.history().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].speed_kmh, 10.0);
        assert_eq!(records[1].voltage, 0.0);
        assert!(!records[0].timestamp.is_empty());

        let raw = fs::read_to_string(dir.path().join("logs").join("commands.csv")).unwrap();
        assert!(raw.lines().all(|l| l.matches(';').count() == 2));
        assert!(raw.contains(";10.00;10.00"));
        assert!(raw.contains(";0.00;0.00"));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.csv");
        fs::write(
            &path,
            "2025-11-02T10:00:00+01:00;5.00;5.00\n\
             garbage line\n\
             2025-11-02T10:00:02+01:00;not-a-number;5.00\n\
             2025-11-02T10:00:04+01:00;7.50\n\
             2025-11-02T10:00:05+01:00;7.50;7.50\n",
        )
        .unwrap();

        let records = CommandLog::new(&path).history().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].speed_kmh, 5.0);
        assert_eq!(records[1].voltage, 7.5);
    }

    #[test]
    fn missing_file_yields_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new(dir.path().join("nope.csv"));
        assert!(log.history().unwrap().is_empty());
    }
}
