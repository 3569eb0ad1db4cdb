use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNKNOWN_NAME: &str = "unknown";
pub const MAX_DAY: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Morning,
    Evening,
}

impl SessionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Some(Self::Morning),
            "evening" => Some(Self::Evening),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Evening => "evening",
        }
    }
}

/// The academic year and session the operator currently has selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicContext {
    pub academic_year_id: i64,
    pub session_type: SessionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Filter,
    Validate,
    Constraints,
    Generate,
    View,
    Conflicts,
    Export,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Filter,
        Step::Validate,
        Step::Constraints,
        Step::Generate,
        Step::View,
        Step::Conflicts,
        Step::Export,
    ];

    /// Main wizard sequence; `Conflicts` is an auxiliary sub-state.
    pub const SEQUENCE: [Step; 6] = [
        Step::Filter,
        Step::Validate,
        Step::Constraints,
        Step::Generate,
        Step::View,
        Step::Export,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" => Some(Self::Filter),
            "validate" => Some(Self::Validate),
            "constraints" => Some(Self::Constraints),
            "generate" => Some(Self::Generate),
            "view" => Some(Self::View),
            "conflicts" => Some(Self::Conflicts),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Validate => "validate",
            Self::Constraints => "constraints",
            Self::Generate => "generate",
            Self::View => "view",
            Self::Conflicts => "conflicts",
            Self::Export => "export",
        }
    }

    /// Position in the main sequence. `Conflicts` sits between `View` and `Export`.
    pub fn rank(self) -> usize {
        match self {
            Self::Filter => 0,
            Self::Validate => 1,
            Self::Constraints => 2,
            Self::Generate => 3,
            Self::View => 4,
            Self::Conflicts => 5,
            Self::Export => 6,
        }
    }

    pub fn next(self) -> Option<Step> {
        match self {
            Self::Filter => Some(Self::Validate),
            Self::Validate => Some(Self::Constraints),
            Self::Constraints => Some(Self::Generate),
            Self::Generate => Some(Self::View),
            Self::View | Self::Conflicts => Some(Self::Export),
            Self::Export => None,
        }
    }

    pub fn previous(self) -> Option<Step> {
        match self {
            Self::Filter => None,
            Self::Validate => Some(Self::Filter),
            Self::Constraints => Some(Self::Validate),
            Self::Generate => Some(Self::Constraints),
            Self::View => Some(Self::Generate),
            Self::Conflicts | Self::Export => Some(Self::View),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepStatus(BTreeMap<Step, bool>);

impl Default for StepStatus {
    fn default() -> Self {
        Self(Step::ALL.iter().map(|s| (*s, false)).collect())
    }
}

impl StepStatus {
    pub fn is_complete(&self, step: Step) -> bool {
        self.0.get(&step).copied().unwrap_or(false)
    }

    pub fn set(&mut self, step: Step, done: bool) {
        self.0.insert(step, done);
    }

    pub fn reset_from(&mut self, first: Step) {
        for step in Step::ALL {
            if step.rank() >= first.rank() {
                self.0.insert(step, false);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTarget {
    pub grade_level: String,
    pub grade_number: i64,
    pub class_id: i64,
    #[serde(default)]
    pub section: Option<String>,
}

impl ClassTarget {
    pub fn label(&self) -> String {
        match self.section.as_deref() {
            Some(section) if !section.is_empty() => {
                format!("{} {} / {}", self.grade_level, self.grade_number, section)
            }
            _ => format!("{} {}", self.grade_level, self.grade_number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub day: u8,
    pub period: u8,
    pub subject_id: i64,
    pub subject_name: String,
    pub teacher_id: i64,
    pub teacher_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default)]
    pub has_conflict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_type: Option<String>,
}

impl Assignment {
    /// Collaborator-side shape of one preview cell.
    pub fn to_preview_entry(&self, target: &ClassTarget) -> serde_json::Value {
        serde_json::json!({
            "class_id": target.class_id,
            "section": target.section,
            "day_of_week": self.day,
            "period_number": self.period,
            "subject_id": self.subject_id,
            "teacher_id": self.teacher_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Forbidden,
    Required,
    NoConsecutive,
    MaxConsecutive,
    MinConsecutive,
    BeforeAfter,
    SubjectPerDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConstraint {
    #[serde(default)]
    pub id: String,
    pub constraint_type: ConstraintKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_number: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_periods: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_consecutive_periods: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_subject_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default = "default_priority")]
    pub priority_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_priority() -> u8 {
    1
}

impl ScheduleConstraint {
    pub fn validate(&self, periods_per_day: u8) -> Result<(), String> {
        if !(1..=4).contains(&self.priority_level) {
            return Err("priority_level must be in 1..=4".to_string());
        }
        if let Some(day) = self.day_of_week {
            if !(1..=MAX_DAY).contains(&day) {
                return Err(format!("day_of_week must be in 1..={}", MAX_DAY));
            }
        }
        if let Some(period) = self.period_number {
            if period == 0 || period > periods_per_day {
                return Err(format!("period_number must be in 1..={}", periods_per_day));
            }
        }
        match self.constraint_type {
            ConstraintKind::MaxConsecutive if self.max_consecutive_periods.is_none() => {
                Err("max_consecutive requires max_consecutive_periods".to_string())
            }
            ConstraintKind::MinConsecutive if self.min_consecutive_periods.is_none() => {
                Err("min_consecutive requires min_consecutive_periods".to_string())
            }
            ConstraintKind::BeforeAfter
                if self.reference_subject_id.is_none() || self.placement.is_none() =>
            {
                Err("before_after requires reference_subject_id and placement".to_string())
            }
            ConstraintKind::NoConsecutive | ConstraintKind::SubjectPerDay
                if self.subject_id.is_none() =>
            {
                Err("constraint requires subject_id".to_string())
            }
            ConstraintKind::Forbidden | ConstraintKind::Required
                if self.day_of_week.is_none() && self.period_number.is_none() =>
            {
                Err("constraint requires day_of_week or period_number".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Parameters sent to the generator, in the collaborator's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub academic_year_id: i64,
    pub session_type: SessionType,
    pub class_id: i64,
    #[serde(default)]
    pub section: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub session_start_time: String,
    pub period_duration: u32,
    pub periods_per_day: u8,
    #[serde(default)]
    pub break_periods: Vec<u8>,
    pub break_duration: u32,
    pub working_days: Vec<u8>,
    pub auto_assign_teachers: bool,
    pub avoid_teacher_conflicts: bool,
    pub balance_teacher_load: bool,
    pub prefer_subject_continuity: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ScheduleConstraint>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub preview_only: bool,
}

impl GenerationRequest {
    pub fn without_preview_marker(&self) -> GenerationRequest {
        GenerationRequest {
            preview_only: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDraft {
    pub academic_year_id: i64,
    pub session_type: SessionType,
    pub target: Option<ClassTarget>,
    pub current_step: Step,
    pub step_status: StepStatus,
    pub preview_assignments: Option<Vec<Assignment>>,
    pub committed_assignments: Vec<Assignment>,
    pub generation_request: Option<GenerationRequest>,
    pub is_preview_mode: bool,
    pub constraints: Vec<ScheduleConstraint>,
    pub has_existing_schedule: bool,
    pub replace_confirmed: bool,
    pub schedule_id: Option<i64>,
    /// Epoch millis when the owning UI went hidden; cleared when it becomes visible.
    pub hidden_at: Option<i64>,
    /// Epoch millis of the last persist.
    pub timestamp: i64,
}

impl ScheduleDraft {
    pub fn new(context: AcademicContext) -> Self {
        Self {
            academic_year_id: context.academic_year_id,
            session_type: context.session_type,
            target: None,
            current_step: Step::Filter,
            step_status: StepStatus::default(),
            preview_assignments: None,
            committed_assignments: Vec::new(),
            generation_request: None,
            is_preview_mode: false,
            constraints: Vec::new(),
            has_existing_schedule: false,
            replace_confirmed: false,
            schedule_id: None,
            hidden_at: None,
            timestamp: 0,
        }
    }

    pub fn context(&self) -> AcademicContext {
        AcademicContext {
            academic_year_id: self.academic_year_id,
            session_type: self.session_type,
        }
    }

    pub fn has_preview_data(&self) -> bool {
        self.preview_assignments
            .as_ref()
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }

    /// Drops preview data that can no longer be trusted and sends the wizard
    /// back to `generate`. The last generation request is kept so it can be
    /// re-issued.
    pub fn discard_preview(&mut self) {
        self.preview_assignments = None;
        self.is_preview_mode = false;
        self.hidden_at = None;
        self.step_status.reset_from(Step::Generate);
        if self.current_step.rank() >= Step::Generate.rank() {
            self.current_step = Step::Generate;
        }
    }

    /// What the `view` step renders.
    pub fn view_assignments(&self) -> &[Assignment] {
        if self.is_preview_mode {
            self.preview_assignments.as_deref().unwrap_or(&[])
        } else {
            &self.committed_assignments
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TeacherDoubleBooking,
    ConstraintViolation,
    RoomConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedEntities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConflictType,
    pub severity: Severity,
    pub priority_level: i64,
    pub description: String,
    pub affected_entities: AffectedEntities,
    pub suggested_resolution: Option<String>,
    pub can_override: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAnalysis {
    pub schedule_id: i64,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub can_publish: bool,
    pub can_save_as_draft: bool,
    pub conflicts: Vec<Conflict>,
}

impl ConflictAnalysis {
    /// Counts and gates are derived here, never taken from the collaborator.
    pub fn from_conflicts(schedule_id: i64, conflicts: Vec<Conflict>) -> Self {
        let count = |sev: Severity| conflicts.iter().filter(|c| c.severity == sev).count();
        let critical_count = count(Severity::Critical);
        let warning_count = count(Severity::Warning);
        let info_count = count(Severity::Info);
        Self {
            schedule_id,
            critical_count,
            warning_count,
            info_count,
            can_publish: critical_count == 0,
            can_save_as_draft: true,
            conflicts,
        }
    }

    pub fn total(&self) -> usize {
        self.conflicts.len()
    }
}
