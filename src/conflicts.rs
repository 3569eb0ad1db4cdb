use crate::backend::SchedulingApi;
use crate::error::ScheduleResult;
use crate::model::{AffectedEntities, Conflict, ConflictAnalysis, ConflictType, Severity};
use crate::shape;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

// Critical conflicts block publishing until the server stops reporting them.
fn acknowledgeable(c: &Conflict) -> bool {
    c.can_override && c.severity != Severity::Critical
}

fn parse_severity(raw: Option<String>) -> Severity {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("critical") | Some("high") | Some("error") => Severity::Critical,
        Some("info") | Some("low") => Severity::Info,
        _ => Severity::Warning,
    }
}

fn parse_kind(raw: Option<String>) -> ConflictType {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("teacher_double_booking") | Some("teacher_conflict") | Some("teacher") => {
            ConflictType::TeacherDoubleBooking
        }
        Some("room_conflict") | Some("room") => ConflictType::RoomConflict,
        _ => ConflictType::ConstraintViolation,
    }
}

fn kind_tag(kind: ConflictType) -> &'static str {
    match kind {
        ConflictType::TeacherDoubleBooking => "teacher_double_booking",
        ConflictType::ConstraintViolation => "constraint_violation",
        ConflictType::RoomConflict => "room_conflict",
    }
}

fn default_priority(severity: Severity) -> i64 {
    match severity {
        Severity::Critical => 4,
        Severity::Warning => 2,
        Severity::Info => 1,
    }
}

fn small(v: Option<i64>) -> Option<u8> {
    v.and_then(|n| u8::try_from(n).ok())
}

fn affected(raw: &Value) -> AffectedEntities {
    let nested = raw
        .get("affected_entities")
        .or_else(|| raw.get("affectedEntities"))
        .filter(|v| v.is_object());
    let src = nested.unwrap_or(raw);
    AffectedEntities {
        subject_id: shape::first_i64(src, &["subject_id", "subjectId"]),
        subject_name: shape::first_str(src, &["subject_name", "subjectName"]),
        teacher_id: shape::first_i64(src, &["teacher_id", "teacherId"]),
        teacher_name: shape::first_str(src, &["teacher_name", "teacherName"]),
        class_id: shape::first_i64(src, &["class_id", "classId"]),
        day: small(shape::first_i64(src, &["day", "day_of_week", "dayOfWeek"])),
        period: small(shape::first_i64(src, &["period", "period_number", "periodNumber"])),
        room: shape::first_str(src, &["room", "room_number", "roomNumber"]),
    }
}

fn synthesized_id(kind: ConflictType, a: &AffectedEntities) -> String {
    let part = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
    format!(
        "{}:{}:{}:{}:{}",
        kind_tag(kind),
        part(a.teacher_id),
        part(a.subject_id),
        part(a.day.map(i64::from)),
        part(a.period.map(i64::from)),
    )
}

/// One conflict in whatever shape the collaborator sent.
pub fn normalize_conflict(raw: &Value) -> Conflict {
    let severity = parse_severity(shape::first_str(raw, &["severity"]));
    let kind = parse_kind(shape::first_str(raw, &["type", "kind", "conflict_type"]));
    let affected_entities = affected(raw);
    let id = shape::first_id(raw, &["id", "conflict_id", "conflictId"])
        .unwrap_or_else(|| synthesized_id(kind, &affected_entities));
    Conflict {
        id,
        kind,
        severity,
        priority_level: shape::first_i64(raw, &["priority_level", "priorityLevel"])
            .unwrap_or_else(|| default_priority(severity)),
        description: shape::first_str(raw, &["description", "message"]).unwrap_or_default(),
        affected_entities,
        suggested_resolution: shape::first_str(
            raw,
            &["suggested_resolution", "suggestedResolution", "suggestion"],
        ),
        can_override: shape::first_bool(raw, &["can_override", "canOverride"])
            .unwrap_or(severity != Severity::Critical),
    }
}

/// Builds an analysis from a conflicts report. Both the `conflicts` and the
/// `warnings` lists contribute; server-side counts and gates are ignored.
pub fn normalize_report(schedule_id: i64, report: &Value) -> ConflictAnalysis {
    let mut conflicts = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for key in ["conflicts", "warnings"] {
        let Some(items) = report.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        for raw in items {
            let mut c = normalize_conflict(raw);
            let n = seen.entry(c.id.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                c.id = format!("{}#{}", c.id, n);
            }
            conflicts.push(c);
        }
    }
    ConflictAnalysis::from_conflicts(schedule_id, conflicts)
}

pub fn analyze(api: &SchedulingApi, schedule_id: i64) -> ScheduleResult<ConflictAnalysis> {
    let report = api.conflicts(schedule_id)?;
    let analysis = normalize_report(schedule_id, &report);
    tracing::info!(
        schedule_id,
        critical = analysis.critical_count,
        warning = analysis.warning_count,
        info = analysis.info_count,
        "conflict analysis"
    );
    Ok(analysis)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityFilter {
    All,
    Critical,
    Warning,
    Info,
}

impl SeverityFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "critical" => Some(Self::Critical),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    fn admits(self, severity: Severity) -> bool {
        match self {
            Self::All => true,
            Self::Critical => severity == Severity::Critical,
            Self::Warning => severity == Severity::Warning,
            Self::Info => severity == Severity::Info,
        }
    }
}

pub fn filter(analysis: &ConflictAnalysis, by: SeverityFilter) -> Vec<&Conflict> {
    analysis
        .conflicts
        .iter()
        .filter(|c| by.admits(c.severity))
        .collect()
}

/// Fetched analysis plus the operator's local acknowledgements.
#[derive(Debug, Clone, Default)]
pub struct ConflictBoard {
    analysis: Option<ConflictAnalysis>,
    resolved: BTreeSet<String>,
}

impl ConflictBoard {
    /// Replaces the analysis. Acknowledgements survive for conflicts that are
    /// still present and still overridable.
    pub fn load(&mut self, analysis: ConflictAnalysis) {
        if self
            .analysis
            .as_ref()
            .map(|a| a.schedule_id != analysis.schedule_id)
            .unwrap_or(false)
        {
            self.resolved.clear();
        }
        self.resolved.retain(|id| {
            analysis
                .conflicts
                .iter()
                .any(|c| &c.id == id && acknowledgeable(c))
        });
        self.analysis = Some(analysis);
    }

    pub fn clear(&mut self) {
        self.analysis = None;
        self.resolved.clear();
    }

    pub fn fetched(&self) -> Option<&ConflictAnalysis> {
        self.analysis.as_ref()
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.resolved.contains(id)
    }

    pub fn resolved_ids(&self) -> Vec<String> {
        self.resolved.iter().cloned().collect()
    }

    pub fn mark_resolved(&mut self, id: &str) -> bool {
        let Some(analysis) = self.analysis.as_ref() else {
            return false;
        };
        let overridable = analysis
            .conflicts
            .iter()
            .any(|c| c.id == id && acknowledgeable(c));
        if !overridable {
            return false;
        }
        self.resolved.insert(id.to_string())
    }

    /// What still needs attention: the fetched analysis minus acknowledged items.
    pub fn active(&self) -> Option<ConflictAnalysis> {
        let analysis = self.analysis.as_ref()?;
        let open = analysis
            .conflicts
            .iter()
            .filter(|c| !self.resolved.contains(&c.id))
            .cloned()
            .collect();
        Some(ConflictAnalysis::from_conflicts(analysis.schedule_id, open))
    }

    pub fn has_unresolved(&self) -> bool {
        self.active().map(|a| a.total() > 0).unwrap_or(false)
    }

    /// Acknowledgements never lift the gate; only a fresh analysis does.
    pub fn can_publish(&self) -> bool {
        self.analysis
            .as_ref()
            .map(|a| a.critical_count == 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn server_report(with_critical: bool) -> Value {
        let mut conflicts = vec![
            json!({ "type": "constraint_violation", "constraint_type": "no_consecutive",
                    "severity": "warning", "description": "Math back to back",
                    "subject_id": 3, "day": 2, "periods": [1, 2] }),
            json!({ "type": "constraint_violation", "severity": "warning",
                    "description": "Science back to back", "subject_id": 4, "day": 3 }),
        ];
        if with_critical {
            conflicts.push(json!({
                "type": "teacher_conflict", "severity": "critical",
                "description": "teacher double booked", "teacher_id": 9,
                "teacher_name": "Mr. Omar", "day": 1, "period": 2,
                "suggestion": "pick another period"
            }));
        }
        json!({
            "schedule_id": 5,
            "total_conflicts": 99,
            "can_publish": true,
            "conflicts": conflicts,
            "warnings": []
        })
    }

    #[test]
    fn server_shape_is_normalized() {
        let a = normalize_report(5, &server_report(true));
        assert_eq!(a.critical_count, 1);
        assert_eq!(a.warning_count, 2);
        assert!(!a.can_publish);
        assert!(a.can_save_as_draft);

        let critical = a
            .conflicts
            .iter()
            .find(|c| c.severity == Severity::Critical)
            .expect("critical");
        assert_eq!(critical.kind, ConflictType::TeacherDoubleBooking);
        assert!(!critical.can_override);
        assert_eq!(critical.priority_level, 4);
        assert_eq!(critical.affected_entities.teacher_id, Some(9));
        assert_eq!(critical.suggested_resolution.as_deref(), Some("pick another period"));
        assert_eq!(critical.id, "teacher_double_booking:9::1:2");
    }

    #[test]
    fn aliases_and_unknown_types() {
        let a = normalize_report(
            1,
            &json!({
                "conflicts": [{ "id": 17, "type": "mystery", "severity": "high" }],
                "warnings": [
                    { "type": "incomplete_assignment", "severity": "medium", "assignment_id": 3 },
                    { "type": "room", "severity": "low", "affectedEntities": { "room": "B2" } }
                ]
            }),
        );
        assert_eq!(a.conflicts[0].id, "17");
        assert_eq!(a.conflicts[0].severity, Severity::Critical);
        assert_eq!(a.conflicts[0].kind, ConflictType::ConstraintViolation);
        assert_eq!(a.conflicts[1].severity, Severity::Warning);
        assert_eq!(a.conflicts[2].severity, Severity::Info);
        assert_eq!(a.conflicts[2].kind, ConflictType::RoomConflict);
        assert_eq!(a.conflicts[2].affected_entities.room.as_deref(), Some("B2"));
    }

    #[test]
    fn duplicate_synthesized_ids_are_disambiguated() {
        let a = normalize_report(
            1,
            &json!({ "warnings": [
                { "type": "incomplete_assignment", "severity": "medium" },
                { "type": "incomplete_assignment", "severity": "medium" }
            ]}),
        );
        assert_ne!(a.conflicts[0].id, a.conflicts[1].id);
    }

    #[test]
    fn publish_unblocks_after_server_side_fix() {
        let transport = Arc::new(ScriptedTransport::default().with("conflicts", Ok(server_report(true))));
        let api = SchedulingApi::new(transport);
        let first = analyze(&api, 5).expect("analysis");
        assert_eq!((first.critical_count, first.warning_count), (1, 2));
        assert!(!first.can_publish);

        let transport = Arc::new(ScriptedTransport::default().with("conflicts", Ok(server_report(false))));
        let api = SchedulingApi::new(transport);
        let second = analyze(&api, 5).expect("analysis");
        assert_eq!(second.critical_count, 0);
        assert!(second.can_publish);
    }

    #[test]
    fn filter_is_a_view() {
        let a = normalize_report(5, &server_report(true));
        assert_eq!(filter(&a, SeverityFilter::All).len(), 3);
        assert_eq!(filter(&a, SeverityFilter::Critical).len(), 1);
        assert_eq!(filter(&a, SeverityFilter::Warning).len(), 2);
        assert!(filter(&a, SeverityFilter::Info).is_empty());
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn only_overridable_conflicts_can_be_resolved() {
        let mut board = ConflictBoard::default();
        assert!(!board.mark_resolved("anything"));
        board.load(normalize_report(5, &server_report(true)));
        let ids: Vec<(String, bool)> = board
            .fetched()
            .expect("analysis")
            .conflicts
            .iter()
            .map(|c| (c.id.clone(), acknowledgeable(c)))
            .collect();
        for (id, allowed) in &ids {
            assert_eq!(board.mark_resolved(id), *allowed);
        }
        let active = board.active().expect("active");
        assert_eq!(active.warning_count, 0);
        assert_eq!(active.critical_count, 1);
        assert!(board.has_unresolved());
        assert!(!board.can_publish());
    }

    #[test]
    fn acknowledgements_survive_reanalysis_of_same_schedule() {
        let mut board = ConflictBoard::default();
        board.load(normalize_report(5, &server_report(true)));
        let warning_id = board
            .fetched()
            .and_then(|a| a.conflicts.iter().find(|c| c.can_override))
            .map(|c| c.id.clone())
            .expect("warning");
        assert!(board.mark_resolved(&warning_id));

        board.load(normalize_report(5, &server_report(false)));
        assert!(board.is_resolved(&warning_id));
        assert!(board.can_publish());

        board.load(normalize_report(6, &server_report(false)));
        assert!(!board.is_resolved(&warning_id));
    }

    #[test]
    fn overridable_critical_still_blocks_publish() {
        let report = json!({
            "schedule_id": 5,
            "conflicts": [{
                "type": "teacher_conflict", "severity": "critical", "can_override": true,
                "description": "teacher double booked", "teacher_id": 9, "day": 1, "period": 2
            }]
        });
        let mut board = ConflictBoard::default();
        board.load(normalize_report(5, &report));
        let id = board.fetched().expect("analysis").conflicts[0].id.clone();
        assert!(board.fetched().expect("analysis").conflicts[0].can_override);

        assert!(!board.mark_resolved(&id));
        assert!(!board.can_publish());
        assert_eq!(board.active().expect("active").critical_count, 1);
    }
}
