//! Profile event recording.
//!
//! An append-only event log the engine feeds while profiling is enabled:
//! run timing, configuration records, per-rule frequencies, per-relation
//! read counts, relation sizes and join-size estimates. Events stay in
//! memory for embedders (and tests) to inspect; when an output file is
//! set they are additionally flushed as JSON lines on `stop_timer`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileEvent {
    /// Wall-clock marker, micros since `start_timer`.
    Time { tag: String, micros: u64 },
    Config { key: String, value: String },
    Quantity { tag: String, value: u64, iteration: usize },
    /// Timed statement with an optional relation size attached.
    Timing { tag: String, micros: u64, size: Option<usize>, iteration: usize },
    RecursiveCount { tag: String, value: f64, iteration: usize },
    NonRecursiveCount { tag: String, value: f64 },
}

pub struct ProfileLog {
    events: Mutex<Vec<ProfileEvent>>,
    output: Mutex<Option<PathBuf>>,
    started: Mutex<Option<Instant>>,
}

impl ProfileLog {
    pub fn new() -> Self {
        ProfileLog {
            events: Mutex::new(Vec::new()),
            output: Mutex::new(None),
            started: Mutex::new(None),
        }
    }

    /// The process-wide default log, for embedders that do not inject
    /// their own.
    pub fn global() -> &'static ProfileLog {
        static GLOBAL: OnceLock<ProfileLog> = OnceLock::new();
        GLOBAL.get_or_init(ProfileLog::new)
    }

    pub fn set_output_file(&self, path: PathBuf) {
        *self.output.lock() = Some(path);
    }

    pub fn start_timer(&self) {
        *self.started.lock() = Some(Instant::now());
    }

    /// Stop the run timer and flush to the output file, if one is set.
    pub fn stop_timer(&self) {
        self.time_event("@time;endtime");
        *self.started.lock() = None;
        self.flush();
    }

    fn elapsed_micros(&self) -> u64 {
        let started = *self.started.lock();
        started
            .map(|t| u64::try_from(t.elapsed().as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    pub fn time_event(&self, tag: &str) {
        let micros = self.elapsed_micros();
        self.push(ProfileEvent::Time { tag: tag.to_string(), micros });
    }

    pub fn config_record(&self, key: &str, value: &str) {
        self.push(ProfileEvent::Config { key: key.to_string(), value: value.to_string() });
    }

    pub fn quantity_event(&self, tag: &str, value: u64, iteration: usize) {
        self.push(ProfileEvent::Quantity { tag: tag.to_string(), value, iteration });
    }

    pub fn timing_event(&self, tag: &str, micros: u64, size: Option<usize>, iteration: usize) {
        self.push(ProfileEvent::Timing { tag: tag.to_string(), micros, size, iteration });
    }

    pub fn recursive_count_event(&self, tag: &str, value: f64, iteration: usize) {
        self.push(ProfileEvent::RecursiveCount { tag: tag.to_string(), value, iteration });
    }

    pub fn non_recursive_count_event(&self, tag: &str, value: f64) {
        self.push(ProfileEvent::NonRecursiveCount { tag: tag.to_string(), value });
    }

    fn push(&self, event: ProfileEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ProfileEvent> {
        self.events.lock().clone()
    }

    fn flush(&self) {
        let Some(path) = self.output.lock().clone() else {
            return;
        };
        let events = self.events.lock();
        let file = match File::create(&path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("warning: cannot write profile log {}: {err}", path.display());
                return;
            }
        };
        let mut out = BufWriter::new(file);
        for event in events.iter() {
            match serde_json::to_string(event) {
                Ok(line) => {
                    if writeln!(out, "{line}").is_err() {
                        break;
                    }
                }
                Err(err) => {
                    eprintln!("warning: cannot serialize profile event: {err}");
                    break;
                }
            }
        }
    }
}

impl Default for ProfileLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_accumulate_in_order() {
        let log = ProfileLog::new();
        log.start_timer();
        log.config_record("relationCount", "3");
        log.quantity_event("@relation-reads;edge", 7, 0);
        log.stop_timer();
        let events = log.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ProfileEvent::Config { key, .. } if key == "relationCount"));
        assert!(matches!(&events[2], ProfileEvent::Time { tag, .. } if tag == "@time;endtime"));
    }
}
