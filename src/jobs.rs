use crate::backend::{Diagnostics, ValidationReport};
use crate::error::ScheduleResult;
use crate::generation::{CommitOutcome, GenerationEvent, GenerationOutcome};
use crate::model::{AcademicContext, Assignment, ClassTarget, ConflictAnalysis};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    SelectClass,
    Validate,
    Generate,
    Diagnostics,
    CommitPreview,
    RefreshView,
    AnalyzeConflicts,
    SaveAsDraft,
    PublishSchedule,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelectClass => "selectClass",
            Self::Validate => "validate",
            Self::Generate => "generate",
            Self::Diagnostics => "diagnostics",
            Self::CommitPreview => "commitPreview",
            Self::RefreshView => "refreshView",
            Self::AnalyzeConflicts => "analyzeConflicts",
            Self::SaveAsDraft => "saveAsDraft",
            Self::PublishSchedule => "publishSchedule",
        }
    }
}

/// What a job's outcome must still match to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct JobScope {
    pub context: AcademicContext,
    pub epoch: u64,
    pub class_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum JobResult {
    ClassChecked {
        target: ClassTarget,
        committed: Vec<Assignment>,
        schedule_id: Option<i64>,
    },
    Validated(ValidationReport),
    Generated(GenerationOutcome),
    Diagnosed(Diagnostics),
    Committed(CommitOutcome),
    Refreshed(Vec<Assignment>),
    Analyzed(ConflictAnalysis),
    SavedAsDraft(Value),
    Published(Value),
}

#[derive(Debug)]
pub struct JobDone {
    pub job_id: String,
    pub kind: JobKind,
    pub scope: JobScope,
    pub result: ScheduleResult<JobResult>,
}

/// Everything the main loop reacts to.
#[derive(Debug)]
pub enum Inbound {
    Line(String),
    Progress {
        job_id: String,
        kind: JobKind,
        percent: u8,
    },
    Done(JobDone),
    Closed,
}

pub fn event(name: &str, job_id: &str, kind: JobKind, extra: Value) -> Value {
    let mut ev = json!({
        "event": name,
        "jobId": job_id,
        "kind": kind.as_str(),
    });
    if let (Some(obj), Value::Object(extra)) = (ev.as_object_mut(), extra) {
        obj.extend(extra);
    }
    ev
}

/// Runs collaborator calls off the main thread and reports back over the
/// inbound channel.
pub struct Jobs {
    tx: Sender<Inbound>,
    running: HashMap<String, JobKind>,
}

impl Jobs {
    pub fn new(tx: Sender<Inbound>) -> Self {
        Self {
            tx,
            running: HashMap::new(),
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running.values().any(|k| *k == kind)
    }

    pub fn running(&self) -> Vec<Value> {
        let mut out: Vec<Value> = self
            .running
            .iter()
            .map(|(id, kind)| json!({ "jobId": id, "kind": kind.as_str() }))
            .collect();
        out.sort_by(|a, b| a["jobId"].as_str().cmp(&b["jobId"].as_str()));
        out
    }

    pub fn finish(&mut self, job_id: &str) -> bool {
        self.running.remove(job_id).is_some()
    }

    pub fn spawn<F>(&mut self, kind: JobKind, scope: JobScope, work: F) -> anyhow::Result<String>
    where
        F: FnOnce(&mut dyn FnMut(GenerationEvent)) -> ScheduleResult<JobResult> + Send + 'static,
    {
        let job_id = format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4().simple());
        let tx = self.tx.clone();
        let id = job_id.clone();
        std::thread::Builder::new()
            .name(format!("job-{}", kind.as_str()))
            .spawn(move || {
                let progress_tx = tx.clone();
                let progress_id = id.clone();
                let mut progress = move |ev: GenerationEvent| {
                    if let GenerationEvent::Progress(percent) = ev {
                        let _ = progress_tx.send(Inbound::Progress {
                            job_id: progress_id.clone(),
                            kind,
                            percent,
                        });
                    }
                };
                let result = work(&mut progress);
                if let Err(e) = &result {
                    tracing::warn!(job = %id, kind = kind.as_str(), error = %e, "job failed");
                }
                let _ = tx.send(Inbound::Done(JobDone {
                    job_id: id,
                    kind,
                    scope,
                    result,
                }));
            })?;
        tracing::debug!(job = %job_id, "job spawned");
        self.running.insert(job_id.clone(), kind);
        Ok(job_id)
    }
}
