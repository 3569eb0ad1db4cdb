use crate::db;
use crate::model::{
    AcademicContext, Assignment, ClassTarget, GenerationRequest, ScheduleConstraint, ScheduleDraft,
    SessionType, Step, StepStatus,
};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const DRAFT_KEY: &str = "timetabled.scheduleDraft.v1";

// Entries stamped further ahead than this were not written by this clock.
const CLOCK_SKEW_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age: Duration,
    pub hidden_preview_limit: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
            hidden_preview_limit: Duration::minutes(10),
        }
    }
}

impl CachePolicy {
    /// Also true for a timestamp that cannot be aged against `now_ms`.
    pub fn is_too_old(&self, timestamp_ms: i64, now_ms: i64) -> bool {
        match now_ms.checked_sub(timestamp_ms) {
            Some(age) => age > self.max_age.num_milliseconds() || age < -CLOCK_SKEW_MS,
            None => true,
        }
    }

    /// Hidden past the limit while preview data was present.
    pub fn is_hidden_preview_stale(&self, draft: &ScheduleDraft, now_ms: i64) -> bool {
        match draft.hidden_at {
            Some(hidden_at) => {
                draft.has_preview_data()
                    && now_ms
                        .checked_sub(hidden_at)
                        .map_or(true, |gone| gone > self.hidden_preview_limit.num_milliseconds())
            }
            None => false,
        }
    }
}

// Persisted envelope. Every field is optional on the way in so that a
// structurally incomplete entry is rejected by validation rather than by a
// parse error with no context.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDraft {
    #[serde(default)]
    academic_year_id: Option<i64>,
    #[serde(default)]
    session_type: Option<SessionType>,
    #[serde(default)]
    current_step: Option<Step>,
    #[serde(default)]
    step_status: Option<StepStatus>,
    #[serde(default)]
    schedule_data: Option<ScheduleData>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleData {
    #[serde(default)]
    target: Option<ClassTarget>,
    #[serde(default)]
    preview_assignments: Option<Vec<Assignment>>,
    #[serde(default)]
    committed_assignments: Vec<Assignment>,
    #[serde(default)]
    generation_request: Option<GenerationRequest>,
    #[serde(default)]
    is_preview_mode: bool,
    #[serde(default)]
    constraints: Vec<ScheduleConstraint>,
    #[serde(default)]
    has_existing_schedule: bool,
    #[serde(default)]
    replace_confirmed: bool,
    #[serde(default)]
    schedule_id: Option<i64>,
    #[serde(default)]
    hidden_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredScope {
    academic_year_id: Option<i64>,
    session_type: Option<SessionType>,
}

impl StoredDraft {
    fn from_draft(draft: &ScheduleDraft) -> Self {
        Self {
            academic_year_id: Some(draft.academic_year_id),
            session_type: Some(draft.session_type),
            current_step: Some(draft.current_step),
            step_status: Some(draft.step_status.clone()),
            schedule_data: Some(ScheduleData {
                target: draft.target.clone(),
                preview_assignments: draft.preview_assignments.clone(),
                committed_assignments: draft.committed_assignments.clone(),
                generation_request: draft.generation_request.clone(),
                is_preview_mode: draft.is_preview_mode,
                constraints: draft.constraints.clone(),
                has_existing_schedule: draft.has_existing_schedule,
                replace_confirmed: draft.replace_confirmed,
                schedule_id: draft.schedule_id,
                hidden_at: draft.hidden_at,
            }),
            timestamp: Some(draft.timestamp),
        }
    }

    fn into_draft(self, policy: &CachePolicy, now_ms: i64) -> Result<ScheduleDraft, &'static str> {
        let timestamp = self.timestamp.ok_or("missing timestamp")?;
        if policy.is_too_old(timestamp, now_ms) {
            return Err("expired");
        }
        let step_status = self.step_status.ok_or("missing stepStatus")?;
        let data = self.schedule_data.ok_or("missing scheduleData")?;
        let academic_year_id = self.academic_year_id.ok_or("missing academicYearId")?;
        let session_type = self.session_type.ok_or("missing sessionType")?;

        let is_preview_mode = data.is_preview_mode && data.preview_assignments.is_some();
        Ok(ScheduleDraft {
            academic_year_id,
            session_type,
            target: data.target,
            current_step: self.current_step.unwrap_or(Step::Filter),
            step_status,
            preview_assignments: if is_preview_mode {
                data.preview_assignments
            } else {
                None
            },
            committed_assignments: data.committed_assignments,
            generation_request: data.generation_request,
            is_preview_mode,
            constraints: data.constraints,
            has_existing_schedule: data.has_existing_schedule,
            replace_confirmed: data.replace_confirmed,
            schedule_id: data.schedule_id,
            hidden_at: data.hidden_at,
            timestamp,
        })
    }
}

/// Sole owner of the persisted wizard draft. Nothing else reads or writes the
/// entry under `DRAFT_KEY`, so the invalidation rules here cannot be bypassed.
pub struct DraftCache<'c> {
    conn: &'c Connection,
    policy: CachePolicy,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl<'c> DraftCache<'c> {
    pub fn new(conn: &'c Connection, policy: CachePolicy) -> Self {
        Self { conn, policy }
    }

    pub fn save(&self, draft: &mut ScheduleDraft) -> anyhow::Result<()> {
        self.save_at(draft, now_ms())
    }

    pub fn save_at(&self, draft: &mut ScheduleDraft, now_ms: i64) -> anyhow::Result<()> {
        draft.timestamp = now_ms;
        let raw = serde_json::to_string(&StoredDraft::from_draft(draft))?;
        db::store_set(self.conn, DRAFT_KEY, &raw)
    }

    pub fn load(&self) -> Option<ScheduleDraft> {
        self.load_at(now_ms())
    }

    /// Returns the stored draft if it is present, well formed and fresh.
    /// Malformed or invalid entries are removed as a side effect.
    pub fn load_at(&self, now_ms: i64) -> Option<ScheduleDraft> {
        let raw = match db::store_get(self.conn, DRAFT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "draft cache read failed");
                return None;
            }
        };

        let parsed = serde_json::from_str::<StoredDraft>(&raw)
            .map_err(|_| "malformed")
            .and_then(|stored| stored.into_draft(&self.policy, now_ms));
        let mut draft = match parsed {
            Ok(d) => d,
            Err(reason) => {
                tracing::warn!(reason, "discarding cached draft");
                self.clear_quietly();
                return None;
            }
        };

        if self.policy.is_hidden_preview_stale(&draft, now_ms) {
            tracing::info!("cached preview went stale while hidden; returning to generate");
            draft.discard_preview();
            if let Err(e) = self.save_at(&mut draft, now_ms) {
                tracing::warn!(error = %e, "failed to persist expired preview");
            }
        }
        Some(draft)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        db::store_remove(self.conn, DRAFT_KEY)
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.clear() {
            tracing::warn!(error = %e, "failed to clear draft cache");
        }
    }

    /// Clears the stored draft when its scoping keys differ from `current`.
    /// Returns `true` when that happened so the caller can reset its own state.
    pub fn invalidate_if_context_changed(&self, current: AcademicContext) -> bool {
        let raw = match db::store_get(self.conn, DRAFT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "draft cache read failed");
                return false;
            }
        };
        let scope = match serde_json::from_str::<StoredScope>(&raw) {
            Ok(s) => s,
            Err(_) => {
                self.clear_quietly();
                return false;
            }
        };
        let matches = scope.academic_year_id == Some(current.academic_year_id)
            && scope.session_type == Some(current.session_type);
        if matches {
            return false;
        }
        tracing::info!(
            stored_year = ?scope.academic_year_id,
            current_year = current.academic_year_id,
            "academic context changed; dropping cached draft"
        );
        self.clear_quietly();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassTarget;

    const HOUR_MS: i64 = 60 * 60 * 1000;
    const MINUTE_MS: i64 = 60 * 1000;

    fn ctx(year: i64) -> AcademicContext {
        AcademicContext {
            academic_year_id: year,
            session_type: SessionType::Morning,
        }
    }

    fn sample_draft(year: i64) -> ScheduleDraft {
        let mut d = ScheduleDraft::new(ctx(year));
        d.target = Some(ClassTarget {
            grade_level: "primary".into(),
            grade_number: 4,
            class_id: 12,
            section: Some("1".into()),
        });
        d.step_status.set(Step::Filter, true);
        d
    }

    fn cell(day: u8, period: u8) -> Assignment {
        Assignment {
            day,
            period,
            subject_id: 1,
            subject_name: "Math".into(),
            teacher_id: 2,
            teacher_name: "T".into(),
            room: None,
            has_conflict: false,
            conflict_type: None,
        }
    }

    #[test]
    fn save_then_load_returns_same_draft() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 1_000).expect("save");
        let loaded = cache.load_at(2_000).expect("loaded");
        assert_eq!(loaded, d);
        assert_eq!(loaded.timestamp, 1_000);
    }

    #[test]
    fn save_is_idempotent() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 5).expect("save");
        cache.save_at(&mut d, 5).expect("save again");
        assert_eq!(cache.load_at(6), Some(d));
    }

    #[test]
    fn drafts_older_than_max_age_are_never_returned() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 0).expect("save");
        assert!(cache.load_at(24 * HOUR_MS).is_some());
        assert!(cache.load_at(24 * HOUR_MS + 1).is_none());
        // Storage was cleared too.
        assert!(db::store_get(&conn, DRAFT_KEY).expect("get").is_none());
    }

    #[test]
    fn malformed_entry_is_cleared_on_load() {
        let conn = db::open_in_memory();
        db::store_set(&conn, DRAFT_KEY, "{not json").expect("set");
        let cache = DraftCache::new(&conn, CachePolicy::default());
        assert!(cache.load_at(0).is_none());
        assert!(db::store_get(&conn, DRAFT_KEY).expect("get").is_none());
    }

    #[test]
    fn entry_missing_schedule_data_fails_validation() {
        let conn = db::open_in_memory();
        db::store_set(
            &conn,
            DRAFT_KEY,
            r#"{"academicYearId":2025,"sessionType":"morning","stepStatus":{"filter":true},"scheduleData":null,"timestamp":10}"#,
        )
        .expect("set");
        let cache = DraftCache::new(&conn, CachePolicy::default());
        assert!(cache.load_at(20).is_none());
        assert!(db::store_get(&conn, DRAFT_KEY).expect("get").is_none());
    }

    #[test]
    fn entry_without_timestamp_fails_validation() {
        let conn = db::open_in_memory();
        db::store_set(
            &conn,
            DRAFT_KEY,
            r#"{"academicYearId":2025,"sessionType":"morning","stepStatus":{},"scheduleData":{}}"#,
        )
        .expect("set");
        let cache = DraftCache::new(&conn, CachePolicy::default());
        assert!(cache.load_at(20).is_none());
    }

    #[test]
    fn unageable_timestamps_are_cleared_on_load() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        for ts in [i64::MIN, i64::MAX, 1_700_000_000_000 + HOUR_MS] {
            let raw = format!(
                r#"{{"academicYearId":2025,"sessionType":"morning","stepStatus":{{}},"scheduleData":{{}},"timestamp":{ts}}}"#
            );
            db::store_set(&conn, DRAFT_KEY, &raw).expect("set");
            assert!(cache.load_at(1_700_000_000_000).is_none(), "timestamp {ts}");
            assert!(db::store_get(&conn, DRAFT_KEY).expect("get").is_none());
        }
    }

    #[test]
    fn slight_clock_skew_is_tolerated() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 30 * 1000).expect("save");
        assert!(cache.load_at(0).is_some());
    }

    #[test]
    fn extreme_hidden_at_counts_as_stale() {
        let policy = CachePolicy::default();
        let mut d = sample_draft(2025);
        d.preview_assignments = Some(vec![cell(1, 1)]);
        d.is_preview_mode = true;
        d.hidden_at = Some(i64::MIN);
        assert!(policy.is_hidden_preview_stale(&d, 1_700_000_000_000));
        d.hidden_at = Some(1_700_000_000_000);
        assert!(!policy.is_hidden_preview_stale(&d, 1_700_000_000_000));
    }

    #[test]
    fn clear_twice_is_a_no_op() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 0).expect("save");
        cache.clear().expect("clear");
        assert!(cache.load_at(1).is_none());
        cache.clear().expect("clear again");
        assert!(cache.load_at(1).is_none());
    }

    #[test]
    fn context_change_drops_draft_for_other_year() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2024);
        cache.save_at(&mut d, 0).expect("save");

        assert!(!cache.invalidate_if_context_changed(ctx(2024)));
        assert!(cache.load_at(1).is_some());

        assert!(cache.invalidate_if_context_changed(ctx(2025)));
        assert!(db::store_get(&conn, DRAFT_KEY).expect("get").is_none());
        assert!(!cache.invalidate_if_context_changed(ctx(2025)));
    }

    #[test]
    fn session_change_alone_invalidates() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        cache.save_at(&mut d, 0).expect("save");
        let evening = AcademicContext {
            academic_year_id: 2025,
            session_type: SessionType::Evening,
        };
        assert!(cache.invalidate_if_context_changed(evening));
        assert!(cache.load_at(1).is_none());
    }

    #[test]
    fn load_after_invalidate_matches_context() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        for (stored, current) in [(2024, 2024), (2024, 2025), (2025, 2024)] {
            let mut d = sample_draft(stored);
            cache.save_at(&mut d, 0).expect("save");
            cache.invalidate_if_context_changed(ctx(current));
            if let Some(loaded) = cache.load_at(1) {
                assert_eq!(loaded.context(), ctx(current));
            }
        }
    }

    #[test]
    fn hidden_preview_expires_back_to_generate() {
        let conn = db::open_in_memory();
        let cache = DraftCache::new(&conn, CachePolicy::default());
        let mut d = sample_draft(2025);
        for step in [Step::Validate, Step::Constraints, Step::Generate] {
            d.step_status.set(step, true);
        }
        d.current_step = Step::View;
        d.preview_assignments = Some(vec![cell(1, 1)]);
        d.is_preview_mode = true;
        d.hidden_at = Some(0);
        cache.save_at(&mut d, 0).expect("save");

        let fresh = cache.load_at(9 * MINUTE_MS).expect("loaded");
        assert!(fresh.is_preview_mode);

        let expired = cache.load_at(11 * MINUTE_MS).expect("loaded");
        assert!(!expired.is_preview_mode);
        assert!(expired.preview_assignments.is_none());
        assert_eq!(expired.current_step, Step::Generate);
        assert!(!expired.step_status.is_complete(Step::Generate));
        assert!(expired.step_status.is_complete(Step::Constraints));
        // Written back, so the next load agrees.
        let again = cache.load_at(11 * MINUTE_MS + 1).expect("loaded");
        assert!(again.preview_assignments.is_none());
    }
}
