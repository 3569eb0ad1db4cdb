use crate::cache::CachePolicy;
use crate::model::{
    AcademicContext, Assignment, ClassTarget, GenerationRequest, ScheduleConstraint, ScheduleDraft,
    Step,
};
use serde_json::{json, Value};

/// What a step completion carries into the draft.
#[derive(Debug, Clone, PartialEq)]
pub enum StepPayload {
    Empty,
    Target {
        target: ClassTarget,
        has_existing_schedule: bool,
    },
    Readiness {
        can_proceed: bool,
    },
    Preview {
        assignments: Vec<Assignment>,
        request: GenerationRequest,
    },
}

/// The wizard. Every transition either applies and returns `true`, or is
/// refused and returns `false` with the draft untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    draft: ScheduleDraft,
}

impl Workflow {
    pub fn new(context: AcademicContext) -> Self {
        Self {
            draft: ScheduleDraft::new(context),
        }
    }

    pub fn from_draft(draft: ScheduleDraft) -> Self {
        let mut wf = Self { draft };
        wf.revalidate();
        wf
    }

    pub fn draft(&self) -> &ScheduleDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut ScheduleDraft {
        &mut self.draft
    }

    pub fn context(&self) -> AcademicContext {
        self.draft.context()
    }

    pub fn current_step(&self) -> Step {
        self.draft.current_step
    }

    pub fn is_complete(&self, step: Step) -> bool {
        self.draft.step_status.is_complete(step)
    }

    /// Nothing worth persisting exists before a class has been chosen.
    pub fn is_persistable(&self) -> bool {
        self.draft.target.is_some()
    }

    fn is_reachable(&self, step: Step) -> bool {
        let current = self.draft.current_step;
        if step == Step::Conflicts {
            return current == Step::Conflicts;
        }
        step == current || step.rank() < current.rank() || self.is_complete(step)
    }

    // Completion is prefix-closed along the main sequence: once an earlier
    // step is incomplete every later flag drops too.
    fn revalidate(&mut self) {
        let mut broken = false;
        for step in Step::SEQUENCE {
            if broken {
                self.draft.step_status.set(step, false);
                if step == Step::View {
                    self.draft.step_status.set(Step::Conflicts, false);
                }
            } else if !self.is_complete(step) {
                broken = true;
            }
        }
    }

    fn clear_downstream_of_filter(&mut self) {
        self.draft.step_status.reset_from(Step::Validate);
        self.draft.preview_assignments = None;
        self.draft.generation_request = None;
        self.draft.is_preview_mode = false;
        self.draft.committed_assignments.clear();
        self.draft.constraints.clear();
        self.draft.schedule_id = None;
        self.draft.replace_confirmed = false;
        self.draft.hidden_at = None;
    }

    pub fn complete_step(&mut self, step: Step, payload: StepPayload) -> bool {
        if !self.is_reachable(step) {
            return false;
        }
        let applied = match (step, payload) {
            (
                Step::Filter,
                StepPayload::Target {
                    target,
                    has_existing_schedule,
                },
            ) => {
                if self.draft.target.as_ref() != Some(&target) {
                    self.clear_downstream_of_filter();
                    self.draft.target = Some(target);
                }
                self.draft.has_existing_schedule = has_existing_schedule;
                if !has_existing_schedule {
                    self.draft.replace_confirmed = false;
                }
                true
            }
            (Step::Filter, StepPayload::Empty) => self.draft.target.is_some(),
            (Step::Validate, StepPayload::Readiness { can_proceed }) => {
                if !can_proceed {
                    self.draft.step_status.set(Step::Validate, false);
                    self.revalidate();
                }
                can_proceed
            }
            (Step::Constraints, StepPayload::Empty) => {
                let periods = self
                    .draft
                    .generation_request
                    .as_ref()
                    .map(|r| r.periods_per_day)
                    .unwrap_or(u8::MAX);
                self.draft
                    .constraints
                    .iter()
                    .all(|c| c.validate(periods).is_ok())
            }
            (
                Step::Generate,
                StepPayload::Preview {
                    assignments,
                    request,
                },
            ) => self.stage_preview(assignments, request),
            // A preview only becomes a viewed schedule by being published.
            (Step::View, StepPayload::Empty) => {
                !self.draft.is_preview_mode && !self.draft.committed_assignments.is_empty()
            }
            _ => false,
        };
        if !applied {
            return false;
        }
        self.draft.step_status.set(step, true);
        self.revalidate();
        true
    }

    fn stage_preview(&mut self, assignments: Vec<Assignment>, request: GenerationRequest) -> bool {
        if assignments.is_empty() {
            return false;
        }
        self.draft.preview_assignments = Some(assignments);
        self.draft.generation_request = Some(request);
        self.draft.is_preview_mode = true;
        self.draft.hidden_at = None;
        // A fresh preview supersedes anything viewed or exported before it.
        self.draft.step_status.reset_from(Step::View);
        true
    }

    /// `onGenerated`: a non-empty preview completes `generate`.
    pub fn apply_preview(&mut self, assignments: Vec<Assignment>, request: GenerationRequest) -> bool {
        self.complete_step(
            Step::Generate,
            StepPayload::Preview {
                assignments,
                request,
            },
        )
    }

    pub fn can_advance(&self) -> bool {
        let current = self.draft.current_step;
        if !self.is_complete(current) || current.next().is_none() {
            return false;
        }
        if current == Step::Filter && self.draft.has_existing_schedule {
            return self.draft.replace_confirmed;
        }
        true
    }

    pub fn advance(&mut self) -> bool {
        if !self.can_advance() {
            return false;
        }
        match self.draft.current_step.next() {
            Some(next) => {
                self.draft.current_step = next;
                true
            }
            None => false,
        }
    }

    pub fn retreat(&mut self) -> bool {
        match self.draft.current_step.previous() {
            Some(prev) => {
                self.draft.current_step = prev;
                true
            }
            None => false,
        }
    }

    pub fn jump_to(&mut self, step: Step) -> bool {
        if step == self.draft.current_step || !self.is_reachable(step) {
            return false;
        }
        self.draft.current_step = step;
        true
    }

    pub fn confirm_replace(&mut self, confirmed: bool) -> bool {
        if !self.draft.has_existing_schedule {
            return false;
        }
        self.draft.replace_confirmed = confirmed;
        true
    }

    pub fn add_constraint(&mut self, constraint: ScheduleConstraint) -> bool {
        if self.draft.current_step != Step::Constraints {
            return false;
        }
        self.draft.constraints.push(constraint);
        self.constraints_edited();
        true
    }

    pub fn remove_constraint(&mut self, id: &str) -> bool {
        if self.draft.current_step != Step::Constraints {
            return false;
        }
        let before = self.draft.constraints.len();
        self.draft.constraints.retain(|c| c.id != id);
        if self.draft.constraints.len() == before {
            return false;
        }
        self.constraints_edited();
        true
    }

    // A preview generated under the old constraints no longer describes them.
    fn constraints_edited(&mut self) {
        if self.draft.is_preview_mode {
            self.draft.discard_preview();
        }
        self.draft.step_status.set(Step::Constraints, false);
        self.revalidate();
    }

    /// Swaps the contents of two preview cells. Moving onto an empty slot
    /// relocates the lesson.
    pub fn swap_preview_cells(&mut self, a: (u8, u8), b: (u8, u8)) -> bool {
        if !self.draft.is_preview_mode || a == b {
            return false;
        }
        let Some(cells) = self.draft.preview_assignments.as_mut() else {
            return false;
        };
        let ia = cells.iter().position(|c| (c.day, c.period) == a);
        let ib = cells.iter().position(|c| (c.day, c.period) == b);
        match (ia, ib) {
            (Some(ia), Some(ib)) => {
                cells[ia].day = b.0;
                cells[ia].period = b.1;
                cells[ib].day = a.0;
                cells[ib].period = a.1;
            }
            (Some(ia), None) => {
                cells[ia].day = b.0;
                cells[ia].period = b.1;
            }
            (None, Some(ib)) => {
                cells[ib].day = a.0;
                cells[ib].period = a.1;
            }
            (None, None) => return false,
        }
        cells.sort_by_key(|c| (c.day, c.period));
        true
    }

    /// The preview was committed; the server's copy is now the source of truth.
    /// Also applies when the preview expired locally while the commit was in
    /// flight: the server accepted it either way.
    pub fn mark_published(&mut self, committed: Vec<Assignment>, schedule_id: Option<i64>) -> bool {
        if self.draft.target.is_none() {
            return false;
        }
        self.draft.is_preview_mode = false;
        self.draft.preview_assignments = None;
        self.draft.committed_assignments = committed;
        self.draft.schedule_id = schedule_id.or(self.draft.schedule_id);
        self.draft.has_existing_schedule = true;
        self.draft.hidden_at = None;
        self.draft.step_status.set(Step::Generate, true);
        self.draft.step_status.set(Step::View, true);
        if self.draft.current_step.rank() < Step::View.rank() {
            self.draft.current_step = Step::View;
        }
        self.revalidate();
        true
    }

    pub fn set_committed(&mut self, committed: Vec<Assignment>, schedule_id: Option<i64>) -> bool {
        if self.draft.is_preview_mode {
            return false;
        }
        self.draft.committed_assignments = committed;
        if schedule_id.is_some() {
            self.draft.schedule_id = schedule_id;
        }
        true
    }

    pub fn enter_conflicts(&mut self, has_unresolved: bool) -> bool {
        let current = self.draft.current_step;
        if !has_unresolved
            || self.draft.is_preview_mode
            || !matches!(current, Step::View | Step::Export)
        {
            return false;
        }
        self.draft.step_status.set(Step::Conflicts, false);
        self.draft.current_step = Step::Conflicts;
        true
    }

    pub fn resolve_conflicts(&mut self, can_publish: bool) -> bool {
        if self.draft.current_step != Step::Conflicts || !can_publish {
            return false;
        }
        self.draft.step_status.set(Step::Conflicts, true);
        self.draft.current_step = Step::Export;
        true
    }

    pub fn mark_exported(&mut self) -> bool {
        if self.draft.current_step != Step::Export
            || self.draft.is_preview_mode
            || self.draft.committed_assignments.is_empty()
        {
            return false;
        }
        self.draft.step_status.set(Step::Export, true);
        self.revalidate();
        true
    }

    pub fn set_hidden(&mut self, at_ms: i64) {
        if self.draft.hidden_at.is_none() {
            self.draft.hidden_at = Some(at_ms);
        }
    }

    /// Returns `true` when the preview had to be discarded.
    pub fn set_visible(&mut self, now_ms: i64, policy: &CachePolicy) -> bool {
        let stale = policy.is_hidden_preview_stale(&self.draft, now_ms);
        if stale {
            self.draft.discard_preview();
        }
        self.draft.hidden_at = None;
        stale
    }

    pub fn reset(&mut self) {
        self.draft = ScheduleDraft::new(self.draft.context());
    }

    pub fn snapshot(&self) -> Value {
        let d = &self.draft;
        let view_source = if d.is_preview_mode { "preview" } else { "committed" };
        json!({
            "academicYearId": d.academic_year_id,
            "sessionType": d.session_type,
            "target": d.target,
            "currentStep": d.current_step,
            "stepStatus": d.step_status,
            "canAdvance": self.can_advance(),
            "hasExistingSchedule": d.has_existing_schedule,
            "replaceConfirmed": d.replace_confirmed,
            "isPreviewMode": d.is_preview_mode,
            "viewSource": view_source,
            "assignments": d.view_assignments(),
            "constraints": d.constraints,
            "generationRequest": d.generation_request,
            "scheduleId": d.schedule_id,
            "timestamp": d.timestamp,
        })
    }
}
