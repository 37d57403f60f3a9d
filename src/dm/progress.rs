//! Reported-property bookkeeping shared by the DM tasks

use simulator_shared::state_machine::ProgressLog;
use simulator_shared::{now_ms, PropertyMap, Value};
use std::time::Instant;

pub const RUNNING: &str = "Running";
pub const FAILED: &str = "Failed";
pub const COMPLETE: &str = "Complete";

/// Per-run progress of one DM task, reported under a fixed prefix
#[derive(Debug)]
pub struct ProgressRecord {
    prefix: &'static str,
    log: ProgressLog,
    started: Instant,
    step_started: Instant,
}

impl ProgressRecord {
    pub fn new(prefix: &'static str) -> Self {
        let now = Instant::now();
        Self {
            prefix,
            log: ProgressLog::new(),
            started: now,
            step_started: now,
        }
    }

    /// Restart both stopwatches
    pub fn restart(&mut self) {
        self.started = Instant::now();
        self.step_started = self.started;
    }

    pub fn restart_step(&mut self) {
        self.step_started = Instant::now();
    }

    pub fn step_elapsed_secs(&self) -> u64 {
        self.step_started.elapsed().as_secs()
    }

    /// A patch that drops everything under the prefix
    pub fn clear(&self) -> PropertyMap {
        PropertyMap::from([(self.prefix.to_string(), Value::null())])
    }

    /// `<prefix>.Status`, `.LastUpdate` and `.Duration-s` for the whole task
    pub fn status(&self, patch: &mut PropertyMap, status: &str) {
        self.write_status(patch, self.prefix.to_string(), status, self.started);
    }

    /// The same triple for one named step; the task status follows the step
    pub fn step_status(&self, patch: &mut PropertyMap, step: &str, status: &str) {
        self.write_status(
            patch,
            format!("{}.{}", self.prefix, step),
            status,
            self.step_started,
        );
        let overall = if status == FAILED { FAILED } else { RUNNING };
        self.status(patch, overall);
    }

    /// Append to the progress log and put the rendered log in the patch
    pub fn log(&mut self, patch: &mut PropertyMap, segment: impl Into<String>, temporary: bool) {
        let rendered = self.log.append(segment, temporary);
        patch.insert(format!("{}.Log", self.prefix), Value::text(rendered));
    }

    fn write_status(&self, patch: &mut PropertyMap, base: String, status: &str, since: Instant) {
        patch.insert(format!("{}.Status", base), Value::text(status));
        patch.insert(
            format!("{}.LastUpdate", base),
            Value::integer(now_ms() as i64),
        );
        patch.insert(
            format!("{}.Duration-s", base),
            Value::integer(since.elapsed().as_secs() as i64),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_fails_task() {
        let record = ProgressRecord::new("Method.UpdateFirmware");
        let mut patch = PropertyMap::new();
        record.step_status(&mut patch, "Download", FAILED);

        assert_eq!(
            patch["Method.UpdateFirmware.Download.Status"].as_str(),
            Some(FAILED)
        );
        assert_eq!(patch["Method.UpdateFirmware.Status"].as_str(), Some(FAILED));
        assert!(patch.contains_key("Method.UpdateFirmware.Download.LastUpdate"));
        assert_eq!(
            patch["Method.UpdateFirmware.Download.Duration-s"].as_i64(),
            Some(0)
        );
    }

    #[test]
    fn test_log_and_clear() {
        let mut record = ProgressRecord::new("Method.ConfigurationUpdate");
        let mut patch = PropertyMap::new();
        record.log(&mut patch, "Downloading", true);
        record.log(&mut patch, "Downloaded(0s)", false);

        assert_eq!(
            patch["Method.ConfigurationUpdate.Log"].as_str(),
            Some("Downloaded(0s)")
        );
        assert!(record.clear()["Method.ConfigurationUpdate"].is_null());
    }
}
