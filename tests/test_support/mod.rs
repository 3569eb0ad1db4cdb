#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// Running sidecar. Event lines that arrive while waiting for a response are
/// queued and handed out by `wait_event`.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    events: VecDeque<Value>,
    next_id: u64,
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        events: VecDeque::new(),
        next_id: 0,
    }
}

impl Sidecar {
    fn read_value(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).expect("read line");
        assert!(n > 0, "sidecar closed stdout");
        serde_json::from_str(line.trim()).expect("parse line json")
    }

    pub fn send_raw(&mut self, raw: &str) {
        writeln!(self.stdin, "{}", raw).expect("write raw");
        self.stdin.flush().expect("flush raw");
    }

    /// Next line that is not an event.
    pub fn read_response(&mut self) -> Value {
        loop {
            let v = self.read_value();
            if v.get("event").is_some() {
                self.events.push_back(v);
                continue;
            }
            return v;
        }
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let value = self.read_response();
        assert_eq!(
            value.get("id").and_then(|v| v.as_str()),
            Some(id.as_str()),
            "response id mismatch for {}",
            method
        );
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let v = self.request(method, params);
        assert_eq!(
            v.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            v
        );
        v.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Blocks until a terminal event (`finished`, `failed` or `discarded`)
    /// for `job_id` arrives. Other events stay queued.
    pub fn wait_job(&mut self, job_id: &str) -> Value {
        loop {
            let pos = self.events.iter().position(|e| {
                e.get("jobId").and_then(|v| v.as_str()) == Some(job_id)
                    && matches!(
                        e.get("event").and_then(|v| v.as_str()),
                        Some("job.finished") | Some("job.failed") | Some("job.discarded")
                    )
            });
            if let Some(i) = pos {
                return self.events.remove(i).expect("queued event");
            }
            let v = self.read_value();
            assert!(v.get("event").is_some(), "unexpected response line: {}", v);
            self.events.push_back(v);
        }
    }

    /// Starts a job and waits for its `job.finished` result.
    pub fn run_job(&mut self, method: &str, params: Value) -> Value {
        let started = self.request_ok(method, params);
        let job_id = started["jobId"]
            .as_str()
            .unwrap_or_else(|| panic!("{} did not start a job: {}", method, started))
            .to_string();
        let ev = self.wait_job(&job_id);
        assert_eq!(ev["event"], json!("job.finished"), "{}: {}", method, ev);
        ev["result"].clone()
    }

    pub fn events_for(&self, job_id: &str) -> Vec<Value> {
        self.events
            .iter()
            .filter(|e| e.get("jobId").and_then(|v| v.as_str()) == Some(job_id))
            .cloned()
            .collect()
    }

    pub fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

pub fn write_fixture(dir: &Path, op: &str, body: Value) {
    std::fs::write(
        dir.join(format!("{}.json", op)),
        serde_json::to_string_pretty(&body).expect("fixture json"),
    )
    .expect("write fixture");
}

pub fn write_failure(dir: &Path, op: &str, status: u16, body: Value) {
    write_fixture(dir, op, json!({ "httpStatus": status, "body": body }));
}

/// Ops recorded by the fixture transport, in call order.
pub fn recorded_calls(dir: &Path) -> Vec<Value> {
    match std::fs::read_to_string(dir.join("calls.jsonl")) {
        Ok(raw) => raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("call log json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn recorded_ops(dir: &Path) -> Vec<String> {
    recorded_calls(dir)
        .iter()
        .filter_map(|c| c["op"].as_str().map(str::to_string))
        .collect()
}

/// A fixture directory with the lookups and an empty committed schedule.
pub fn base_fixtures(dir: &Path) {
    std::fs::create_dir_all(dir).expect("fixture dir");
    write_fixture(
        dir,
        "subjects",
        json!([
            { "id": 3, "subject_name": "Math" },
            { "id": 4, "subject_name": "Science" }
        ]),
    );
    write_fixture(
        dir,
        "teachers",
        json!([
            { "id": 9, "full_name": "Ms. Salma" },
            { "id": 10, "full_name": "Mr. Omar" }
        ]),
    );
    write_fixture(dir, "class_schedule", json!([]));
    write_fixture(
        dir,
        "validate",
        json!({ "is_valid": true, "can_proceed": true, "errors": [], "warnings": [] }),
    );
}

pub fn generated_preview() -> Value {
    json!({
        "schedule_id": 0,
        "generation_status": "preview",
        "total_assignments_created": 3,
        "conflicts_detected": 0,
        "warnings": [],
        "preview_data": [
            { "day_of_week": 1, "period_number": 1, "subject_id": 3, "teacher_id": 9 },
            { "day_of_week": 1, "period_number": 2, "subject_id": 4, "teacher_id": 10 },
            { "day_of_week": 2, "period_number": 1, "subject_id": 3, "teacher_id": 9 }
        ]
    })
}

pub fn committed_entries(schedule_id: i64) -> Value {
    json!([
        { "schedule_id": schedule_id, "day_of_week": 1, "period_number": 1,
          "subject_id": 3, "subject_name": "Math", "teacher_id": 9, "teacher_name": "Ms. Salma" },
        { "schedule_id": schedule_id, "day_of_week": 1, "period_number": 2,
          "subject_id": 4, "subject_name": "Science", "teacher_id": 10, "teacher_name": "Mr. Omar" },
        { "schedule_id": schedule_id, "day_of_week": 2, "period_number": 1,
          "subject_id": 3, "subject_name": "Math", "teacher_id": 9, "teacher_name": "Ms. Salma" }
    ])
}

pub fn target() -> Value {
    json!({ "gradeLevel": "primary", "gradeNumber": 4, "classId": 12, "section": "2" })
}

/// Opens a workspace wired to `fixtures` and sets the academic context.
pub fn open_workspace(sc: &mut Sidecar, workspace: &Path, fixtures: &Path) {
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    sc.request_ok(
        "setup.update",
        json!({
            "section": "backend",
            "patch": { "kind": "fixture", "fixturePath": fixtures.to_string_lossy() }
        }),
    );
    sc.request_ok(
        "context.set",
        json!({ "academicYearId": 2025, "sessionType": "morning" }),
    );
}

/// Drives the wizard from a fresh draft up to the generate step.
pub fn walk_to_generate(sc: &mut Sidecar) {
    let picked = sc.run_job("wizard.selectClass", json!({ "target": target() }));
    assert_eq!(picked["applied"], json!(true), "{}", picked);
    assert_eq!(sc.request_ok("wizard.advance", json!({}))["applied"], json!(true));
    let validated = sc.run_job("wizard.validate", json!({}));
    assert_eq!(validated["applied"], json!(true), "{}", validated);
    assert_eq!(sc.request_ok("wizard.advance", json!({}))["applied"], json!(true));
    let done = sc.request_ok("wizard.completeStep", json!({ "step": "constraints" }));
    assert_eq!(done["applied"], json!(true), "{}", done);
    assert_eq!(sc.request_ok("wizard.advance", json!({}))["applied"], json!(true));
}

/// Generates a preview and commits it; returns the publish job result.
pub fn generate_and_publish(sc: &mut Sidecar, fixtures: &Path, schedule_id: i64) -> Value {
    write_fixture(fixtures, "generate", generated_preview());
    walk_to_generate(sc);
    let generated = sc.run_job("generation.start", json!({}));
    assert_eq!(generated["applied"], json!(true), "{}", generated);
    write_fixture(
        fixtures,
        "save_preview",
        json!({ "success": true, "data": { "schedule_id": schedule_id } }),
    );
    write_fixture(fixtures, "class_schedule", committed_entries(schedule_id));
    let published = sc.run_job("generation.publish", json!({}));
    assert_eq!(published["applied"], json!(true), "{}", published);
    published
}
