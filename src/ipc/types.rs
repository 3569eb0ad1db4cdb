use std::path::PathBuf;

use crate::backend::SchedulingApi;
use crate::conflicts::ConflictBoard;
use crate::generation::GenerationCycle;
use crate::jobs::{JobScope, Jobs};
use crate::model::AcademicContext;
use crate::workflow::Workflow;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub api: Option<SchedulingApi>,
    /// `None` until the UI reports its academic context.
    pub workflow: Option<Workflow>,
    pub cycle: GenerationCycle,
    pub board: ConflictBoard,
    /// Bumped whenever in-flight results must no longer apply.
    pub epoch: u64,
    pub jobs: Jobs,
    /// Outcome of the last generation attempt, for `generation.status`.
    pub last_generation: Option<serde_json::Value>,
    /// Unsolicited messages to write after the current response.
    pub outbox: Vec<serde_json::Value>,
}

impl AppState {
    pub fn new(jobs: Jobs) -> Self {
        Self {
            workspace: None,
            db: None,
            api: None,
            workflow: None,
            cycle: GenerationCycle::default(),
            board: ConflictBoard::default(),
            epoch: 0,
            jobs,
            last_generation: None,
            outbox: Vec::new(),
        }
    }

    pub fn context(&self) -> Option<AcademicContext> {
        self.workflow.as_ref().map(|wf| wf.context())
    }

    pub fn current_scope(&self) -> Option<JobScope> {
        let wf = self.workflow.as_ref()?;
        Some(JobScope {
            context: wf.context(),
            epoch: self.epoch,
            class_id: wf.draft().target.as_ref().map(|t| t.class_id),
        })
    }

    /// Drops everything tied to the previous draft.
    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
        self.cycle.reset();
        self.board.clear();
        self.last_generation = None;
    }
}
