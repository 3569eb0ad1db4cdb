use super::{ApiCall, Transport};
use crate::error::{classify_failure, ScheduleError, ScheduleResult};
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CALL_LOG: &str = "calls.jsonl";

/// Serves canned responses from `<dir>/<op>.json` and appends every call to
/// `<dir>/calls.jsonl`. Files are re-read on each call so a test can change a
/// response between requests.
///
/// A response file is either the success body itself or an envelope
/// `{"httpStatus": 400, "body": {...}}`.
pub struct FixtureTransport {
    dir: PathBuf,
    log_lock: Mutex<()>,
}

impl FixtureTransport {
    pub fn new(dir: &Path) -> anyhow::Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("fixture directory not found: {}", dir.to_string_lossy());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            log_lock: Mutex::new(()),
        })
    }

    fn record(&self, call: &ApiCall) -> ScheduleResult<()> {
        let _guard = self
            .log_lock
            .lock()
            .map_err(|_| ScheduleError::Fixture("call log lock poisoned".into()))?;
        let line = json!({
            "op": call.op,
            "method": call.method.as_str(),
            "path": call.path,
            "query": call.query,
            "body": call.body,
        });
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(CALL_LOG))
            .map_err(|e| ScheduleError::Fixture(e.to_string()))?;
        writeln!(f, "{}", line).map_err(|e| ScheduleError::Fixture(e.to_string()))
    }
}

impl Transport for FixtureTransport {
    fn send(&self, call: &ApiCall) -> ScheduleResult<Value> {
        self.record(call)?;
        let path = self.dir.join(format!("{}.json", call.op));
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| ScheduleError::Fixture(format!("no fixture for {}", call.op)))?;
        let v: Value = serde_json::from_str(&raw)
            .map_err(|e| ScheduleError::Fixture(format!("{}: {}", call.op, e)))?;

        let status = v.get("httpStatus").and_then(|s| s.as_u64());
        match status {
            Some(status) => {
                let body = v.get("body").cloned().unwrap_or(Value::Null);
                if (200..300).contains(&status) {
                    Ok(body)
                } else if status == 0 {
                    Err(ScheduleError::Transport(format!(
                        "{}: connection refused",
                        call.op
                    )))
                } else {
                    Err(classify_failure(status as u16, &body))
                }
            }
            None => Ok(v),
        }
    }

    fn describe(&self) -> String {
        format!("fixture {}", self.dir.to_string_lossy())
    }
}
