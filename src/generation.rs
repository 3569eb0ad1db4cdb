use crate::backend::{Diagnostics, SchedulingApi};
use crate::error::ScheduleResult;
use crate::model::{
    AcademicContext, Assignment, ClassTarget, GenerationRequest, ScheduleConstraint, MAX_DAY,
    UNKNOWN_NAME,
};
use crate::shape;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const MAX_DRAFT_AGE_HOURS: i64 = 168;
const MAX_HIDDEN_PREVIEW_MINUTES: i64 = 1440;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CyclePhase {
    #[default]
    Idle,
    Generating,
    PreviewReady,
    Failed,
    Publishing,
    Published,
    PublishFailed,
}

/// Local state machine for one generate/publish cycle.
#[derive(Debug, Clone, Default)]
pub struct GenerationCycle {
    phase: CyclePhase,
}

impl GenerationCycle {
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, CyclePhase::Generating | CyclePhase::Publishing)
    }

    pub fn begin_generation(&mut self) -> bool {
        if self.is_busy() {
            return false;
        }
        self.phase = CyclePhase::Generating;
        true
    }

    pub fn finish_generation(&mut self, preview_ready: bool) {
        if self.phase == CyclePhase::Generating {
            self.phase = if preview_ready {
                CyclePhase::PreviewReady
            } else {
                CyclePhase::Failed
            };
        }
    }

    /// A failed publish leaves the preview in place, so the operator may retry.
    pub fn begin_publish(&mut self) -> bool {
        if !matches!(self.phase, CyclePhase::PreviewReady | CyclePhase::PublishFailed) {
            return false;
        }
        self.phase = CyclePhase::Publishing;
        true
    }

    pub fn finish_publish(&mut self, published: bool) {
        if self.phase == CyclePhase::Publishing {
            self.phase = if published {
                CyclePhase::Published
            } else {
                CyclePhase::PublishFailed
            };
        }
    }

    /// Re-derives the phase from a draft restored from the cache.
    pub fn restore(&mut self, has_preview: bool) {
        self.phase = if has_preview {
            CyclePhase::PreviewReady
        } else {
            CyclePhase::Idle
        };
    }

    pub fn reset(&mut self) {
        self.phase = CyclePhase::Idle;
    }
}

/// Generation knobs, stored as the `setup.scheduling` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    pub periods_per_day: u8,
    pub period_duration_minutes: u32,
    pub session_start_time: String,
    pub break_periods: Vec<u8>,
    pub break_duration_minutes: u32,
    pub working_days: Vec<u8>,
    pub auto_assign_teachers: bool,
    pub avoid_teacher_conflicts: bool,
    pub balance_teacher_load: bool,
    pub prefer_subject_continuity: bool,
    pub draft_max_age_hours: i64,
    pub hidden_preview_limit_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            periods_per_day: 6,
            period_duration_minutes: 45,
            session_start_time: "08:00".to_string(),
            break_periods: vec![3],
            break_duration_minutes: 15,
            working_days: vec![1, 2, 3, 4, 5],
            auto_assign_teachers: true,
            avoid_teacher_conflicts: true,
            balance_teacher_load: true,
            prefer_subject_continuity: false,
            draft_max_age_hours: 24,
            hidden_preview_limit_minutes: 10,
            start_date: None,
            end_date: None,
            name: None,
        }
    }
}

impl GenerationOptions {
    /// Overlays per-request overrides (same camelCase keys) onto these options.
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self, String> {
        let mut base = serde_json::to_value(self).map_err(|e| e.to_string())?;
        if let (Some(base_obj), Some(patch)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in patch {
                base_obj.insert(k.clone(), v.clone());
            }
        }
        let merged: GenerationOptions =
            serde_json::from_value(base).map_err(|e| format!("invalid options: {}", e))?;
        merged.check()?;
        Ok(merged)
    }

    pub fn check(&self) -> Result<(), String> {
        if !(1..=12).contains(&self.periods_per_day) {
            return Err("periodsPerDay must be in 1..=12".into());
        }
        if !(10..=120).contains(&self.period_duration_minutes) {
            return Err("periodDurationMinutes must be in 10..=120".into());
        }
        if NaiveTime::parse_from_str(&self.session_start_time, "%H:%M").is_err() {
            return Err("sessionStartTime must be HH:MM".into());
        }
        if self.working_days.is_empty() {
            return Err("workingDays must not be empty".into());
        }
        if self.working_days.iter().any(|d| !(1..=MAX_DAY).contains(d)) {
            return Err(format!("workingDays must be in 1..={}", MAX_DAY));
        }
        if self
            .break_periods
            .iter()
            .any(|p| *p == 0 || *p > self.periods_per_day)
        {
            return Err("breakPeriods must fall inside the school day".into());
        }
        if !(1..=MAX_DRAFT_AGE_HOURS).contains(&self.draft_max_age_hours) {
            return Err(format!("draftMaxAgeHours must be in 1..={}", MAX_DRAFT_AGE_HOURS));
        }
        if !(1..=MAX_HIDDEN_PREVIEW_MINUTES).contains(&self.hidden_preview_limit_minutes) {
            return Err(format!(
                "hiddenPreviewLimitMinutes must be in 1..={}",
                MAX_HIDDEN_PREVIEW_MINUTES
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err("endDate must not be before startDate".into());
            }
        }
        Ok(())
    }
}

pub fn default_schedule_name(target: &ClassTarget) -> String {
    match target.section.as_deref() {
        Some(section) if !section.is_empty() => format!(
            "Grade {} {} - Section {}",
            target.grade_number, target.grade_level, section
        ),
        _ => format!("Grade {} {}", target.grade_number, target.grade_level),
    }
}

pub fn build_request(
    context: AcademicContext,
    target: &ClassTarget,
    options: &GenerationOptions,
    constraints: &[ScheduleConstraint],
) -> GenerationRequest {
    let name = options
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_schedule_name(target));
    GenerationRequest {
        academic_year_id: context.academic_year_id,
        session_type: context.session_type,
        class_id: target.class_id,
        section: target.section.clone(),
        name,
        start_date: options.start_date,
        end_date: options.end_date,
        session_start_time: options.session_start_time.clone(),
        period_duration: options.period_duration_minutes,
        periods_per_day: options.periods_per_day,
        break_periods: options.break_periods.clone(),
        break_duration: options.break_duration_minutes,
        working_days: options.working_days.clone(),
        auto_assign_teachers: options.auto_assign_teachers,
        avoid_teacher_conflicts: options.avoid_teacher_conflicts,
        balance_teacher_load: options.balance_teacher_load,
        prefer_subject_continuity: options.prefer_subject_continuity,
        constraints: constraints.to_vec(),
        preview_only: true,
    }
}

/// Subject and teacher names by id.
#[derive(Debug, Clone, Default)]
pub struct NameLookup {
    subjects: HashMap<i64, String>,
    teachers: HashMap<i64, String>,
}

impl NameLookup {
    pub fn from_lists(subjects: &[Value], teachers: &[Value]) -> Self {
        let index = |items: &[Value], names: &[&str]| {
            items
                .iter()
                .filter_map(|item| {
                    let id = shape::first_i64(item, &["id"])?;
                    let name = shape::first_str(item, names)?;
                    Some((id, name))
                })
                .collect::<HashMap<_, _>>()
        };
        Self {
            subjects: index(subjects, &["subject_name", "name"]),
            teachers: index(teachers, &["full_name", "name"]),
        }
    }

    /// Fetches both tables once. A failed fetch leaves that table empty.
    pub fn fetch(api: &SchedulingApi) -> Self {
        let subjects = api.subjects().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "subject lookup unavailable");
            Vec::new()
        });
        let teachers = api.teachers().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "teacher lookup unavailable");
            Vec::new()
        });
        Self::from_lists(&subjects, &teachers)
    }

    pub fn subject(&self, id: i64) -> Option<&str> {
        self.subjects.get(&id).map(String::as_str)
    }

    pub fn teacher(&self, id: i64) -> Option<&str> {
        self.teachers.get(&id).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapped {
    pub assignments: Vec<Assignment>,
    pub dropped: usize,
}

fn map_entry(raw: &Value, lookup: &NameLookup) -> Option<Assignment> {
    let day = shape::first_i64(raw, &["day_of_week", "day"])?;
    let period = shape::first_i64(raw, &["period_number", "period"])?;
    if !(1..=MAX_DAY as i64).contains(&day) || !(1..=u8::MAX as i64).contains(&period) {
        return None;
    }
    let subject_id = shape::first_i64(raw, &["subject_id", "subject.id"]).unwrap_or(0);
    let teacher_id = shape::first_i64(raw, &["teacher_id", "teacher.id"]).unwrap_or(0);
    let subject_name = shape::first_str(
        raw,
        &["subject_name", "subject.subject_name", "subject.name"],
    )
    .or_else(|| lookup.subject(subject_id).map(str::to_string))
    .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let teacher_name = shape::first_str(raw, &["teacher_name", "teacher.full_name", "teacher.name"])
        .or_else(|| lookup.teacher(teacher_id).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());

    Some(Assignment {
        day: day as u8,
        period: period as u8,
        subject_id,
        subject_name,
        teacher_id,
        teacher_name,
        room: shape::first_str(raw, &["room", "room_number"]),
        has_conflict: shape::first_bool(raw, &["has_conflict"]).unwrap_or(false),
        conflict_type: shape::first_str(raw, &["conflict_type"]),
    })
}

/// Normalizes collaborator entries into `Assignment`s ordered by day then period.
/// Entries that cannot be placed on the grid are dropped and counted.
pub fn map_to_assignments(raw: &[Value], lookup: &NameLookup) -> Mapped {
    let mut out = Mapped::default();
    for entry in raw {
        match map_entry(entry, lookup) {
            Some(a) => out.assignments.push(a),
            None => out.dropped += 1,
        }
    }
    out.assignments.sort_by_key(|a| (a.day, a.period));
    out
}

/// Progress of a long-running collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Started,
    Progress(u8),
    Finished,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Preview {
        assignments: Vec<Assignment>,
        request: GenerationRequest,
        warnings: Vec<String>,
        dropped: usize,
        conflicts_detected: i64,
    },
    /// Nothing was placed and the collaborator said why.
    SoftFailure {
        warnings: Vec<String>,
        diagnostics: Option<Diagnostics>,
    },
}

pub fn run_generation(
    api: &SchedulingApi,
    request: &GenerationRequest,
    fetch_diagnostics: bool,
    progress: &mut dyn FnMut(GenerationEvent),
) -> ScheduleResult<GenerationOutcome> {
    progress(GenerationEvent::Started);
    let request = GenerationRequest {
        preview_only: true,
        ..request.clone()
    };
    let response = match api.generate(&request) {
        Ok(r) => r,
        Err(e) => {
            progress(GenerationEvent::Failed(e.to_string()));
            return Err(e);
        }
    };
    progress(GenerationEvent::Progress(50));

    let warnings = response.warning_messages();
    let raw = response.preview_data.unwrap_or_default();
    if response.total_assignments_created == 0 && raw.is_empty() {
        tracing::info!(
            class_id = request.class_id,
            warnings = warnings.len(),
            "generation placed nothing"
        );
        let diagnostics = if fetch_diagnostics {
            api.diagnostics(request.academic_year_id, request.session_type)
                .map_err(|e| tracing::warn!(error = %e, "diagnostics unavailable"))
                .ok()
        } else {
            None
        };
        progress(GenerationEvent::Failed(format!(
            "no assignments created ({} warning(s))",
            warnings.len()
        )));
        return Ok(GenerationOutcome::SoftFailure {
            warnings,
            diagnostics,
        });
    }

    let lookup = NameLookup::fetch(api);
    progress(GenerationEvent::Progress(80));
    let mapped = map_to_assignments(&raw, &lookup);
    if mapped.assignments.is_empty() {
        let mut warnings = warnings;
        warnings.push(format!(
            "{} preview entries could not be placed on the grid",
            mapped.dropped
        ));
        progress(GenerationEvent::Failed("preview was empty".into()));
        return Ok(GenerationOutcome::SoftFailure {
            warnings,
            diagnostics: None,
        });
    }
    progress(GenerationEvent::Finished);
    Ok(GenerationOutcome::Preview {
        assignments: mapped.assignments,
        request,
        warnings,
        dropped: mapped.dropped,
        conflicts_detected: response.conflicts_detected,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub schedule_id: Option<i64>,
    pub committed: Vec<Assignment>,
    /// Set when the commit landed but the follow-up read did not.
    pub refetch_error: Option<String>,
}

/// Persists a preview and returns what the server now holds for the class.
pub fn run_commit(
    api: &SchedulingApi,
    context: AcademicContext,
    target: &ClassTarget,
    request: &GenerationRequest,
    preview: &[Assignment],
    progress: &mut dyn FnMut(GenerationEvent),
) -> ScheduleResult<CommitOutcome> {
    progress(GenerationEvent::Started);
    let entries: Vec<Value> = preview.iter().map(|a| a.to_preview_entry(target)).collect();
    let saved = match api.save_preview(&request.without_preview_marker(), entries) {
        Ok(s) => s,
        Err(e) => {
            progress(GenerationEvent::Failed(e.to_string()));
            return Err(e);
        }
    };
    progress(GenerationEvent::Progress(60));
    let (committed, refetch_error) = match fetch_committed(api, context, target) {
        Ok(c) => (c, None),
        Err(e) => {
            tracing::warn!(error = %e, "commit succeeded but re-fetch failed");
            (Vec::new(), Some(e.to_string()))
        }
    };
    progress(GenerationEvent::Finished);
    Ok(CommitOutcome {
        schedule_id: saved.schedule_id,
        committed,
        refetch_error,
    })
}

pub fn fetch_committed(
    api: &SchedulingApi,
    context: AcademicContext,
    target: &ClassTarget,
) -> ScheduleResult<Vec<Assignment>> {
    let raw = api.class_schedule(context, target)?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let lookup = NameLookup::fetch(api);
    let mapped = map_to_assignments(&raw, &lookup);
    if mapped.dropped > 0 {
        tracing::warn!(dropped = mapped.dropped, "committed entries without a grid slot");
    }
    Ok(mapped.assignments)
}

/// Schedule id of the committed class schedule, when the listing carries one.
pub fn committed_schedule_id(raw: &[Value]) -> Option<i64> {
    raw.iter()
        .find_map(|entry| shape::first_i64(entry, &["schedule_id", "schedule.id"]))
        .filter(|id| *id > 0)
}
