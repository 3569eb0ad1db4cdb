use crate::model::{Assignment, ClassTarget, ScheduleDraft};
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const SCHEDULE_JSON_ENTRY: &str = "schedule.json";
const SCHEDULE_CSV_ENTRY: &str = "schedule.csv";
pub const BUNDLE_FORMAT: &str = "timetabled-schedule-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub assignment_count: usize,
    pub sha256: String,
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn schedule_csv(assignments: &[Assignment]) -> String {
    let mut out =
        String::from("day,period,subject_id,subject_name,teacher_id,teacher_name,room,has_conflict\n");
    for a in assignments {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            a.day,
            a.period,
            a.subject_id,
            csv_quote(&a.subject_name),
            a.teacher_id,
            csv_quote(&a.teacher_name),
            csv_quote(a.room.as_deref().unwrap_or("")),
            a.has_conflict
        ));
    }
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Writes the committed schedule of `draft` as a zip bundle. Preview data is
/// never exported.
pub fn export_schedule_bundle(
    draft: &ScheduleDraft,
    target: &ClassTarget,
    out_path: &Path,
    exported_at_ms: i64,
) -> anyhow::Result<ExportSummary> {
    if draft.is_preview_mode {
        return Err(anyhow!("preview schedules cannot be exported"));
    }
    let assignments = &draft.committed_assignments;
    if assignments.is_empty() {
        return Err(anyhow!("no committed assignments to export"));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let payload = serde_json::to_vec_pretty(&json!({
        "academicYearId": draft.academic_year_id,
        "sessionType": draft.session_type,
        "target": target,
        "scheduleId": draft.schedule_id,
        "assignments": assignments,
    }))
    .context("failed to serialize schedule")?;
    let digest = sha256_hex(&payload);
    let csv = schedule_csv(assignments);

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at_ms,
        "classLabel": target.label(),
        "assignmentCount": assignments.len(),
        "sha256": digest,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(SCHEDULE_JSON_ENTRY, opts)
        .context("failed to start schedule entry")?;
    zip.write_all(&payload)
        .context("failed to write schedule entry")?;

    zip.start_file(SCHEDULE_CSV_ENTRY, opts)
        .context("failed to start csv entry")?;
    zip.write_all(csv.as_bytes())
        .context("failed to write csv entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    tracing::info!(
        out = %out_path.to_string_lossy(),
        assignments = assignments.len(),
        "schedule exported"
    );
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 3,
        assignment_count: assignments.len(),
        sha256: digest,
    })
}

/// Reads a bundle back and checks the payload against the manifest digest.
pub fn verify_schedule_bundle(in_path: &Path) -> anyhow::Result<serde_json::Value> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut payload = Vec::new();
    archive
        .by_name(SCHEDULE_JSON_ENTRY)
        .context("bundle missing schedule.json")?
        .read_to_end(&mut payload)
        .context("failed to read schedule.json")?;
    let expected = manifest.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
    if sha256_hex(&payload) != expected {
        return Err(anyhow!("schedule.json does not match manifest digest"));
    }
    serde_json::from_slice(&payload).context("schedule.json is invalid JSON")
}
