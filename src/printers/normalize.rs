//! Vendor telemetry -> canonical snapshot mapping.
//!
//! Pure per-vendor functions: the same payload always yields the same
//! snapshot (modulo capture timestamp). Missing data stays missing; the
//! normalizer never invents a value the printer did not report.

use serde_json::Value;

use super::snapshot::{FilamentSlot, PrinterStatusSnapshot};
use super::{PrinterStatus, PrinterVendor};

/// Maps a raw vendor payload to a canonical snapshot.
pub fn normalize(vendor: PrinterVendor, printer_id: &str, raw: Value) -> PrinterStatusSnapshot {
    let mut snapshot = match vendor {
        PrinterVendor::BambuLab => normalize_bambu(printer_id, &raw),
        PrinterVendor::PrusaCore => normalize_prusa(printer_id, &raw),
        PrinterVendor::Unknown => normalize_generic(printer_id, &raw),
    };
    enforce_single_active_slot(printer_id, &mut snapshot.filament_slots);
    snapshot.raw = raw;
    snapshot
}

fn normalize_bambu(printer_id: &str, raw: &Value) -> PrinterStatusSnapshot {
    let print = &raw["print"];
    let mut snapshot = PrinterStatusSnapshot::empty(printer_id, Value::Null);

    snapshot.status = match print["gcode_state"].as_str() {
        Some("RUNNING") | Some("PREPARE") => PrinterStatus::Printing,
        Some("PAUSE") => PrinterStatus::Paused,
        Some("FAILED") => PrinterStatus::Error,
        Some("IDLE") | Some("FINISH") => PrinterStatus::Online,
        _ => PrinterStatus::Unknown,
    };
    snapshot.bed_temperature = print["bed_temper"].as_f64();
    snapshot.nozzle_temperature = print["nozzle_temper"].as_f64();
    snapshot.progress = clamp_progress(&print["mc_percent"]);
    snapshot.current_job = print["subtask_name"].as_str().map(str::to_string);
    snapshot.remaining_minutes = print["mc_remaining_time"].as_u64().map(|m| m as u32);

    if let Some(job_id) = print["job_id"].as_str() {
        if print["thumbnail"].as_bool() == Some(true) {
            snapshot.thumbnail_url = Some(thumbnail_path(job_id));
        }
    }

    // AMS trays: tray_now names the active slot index.
    let active_index = print["ams"]["tray_now"]
        .as_str()
        .and_then(|s| s.parse::<u8>().ok())
        .or_else(|| print["ams"]["tray_now"].as_u64().map(|n| n as u8));
    if let Some(trays) = print["ams"]["tray"].as_array() {
        for (i, tray) in trays.iter().enumerate() {
            let index = tray["id"]
                .as_str()
                .and_then(|s| s.parse::<u8>().ok())
                .or_else(|| tray["id"].as_u64().map(|n| n as u8))
                .unwrap_or(i as u8);
            snapshot.filament_slots.push(FilamentSlot {
                index,
                color: tray["tray_color"].as_str().map(str::to_string),
                material: tray["tray_type"].as_str().map(str::to_string),
                active: Some(index) == active_index || tray["active"].as_bool() == Some(true),
            });
        }
    }

    snapshot
}

fn normalize_prusa(printer_id: &str, raw: &Value) -> PrinterStatusSnapshot {
    let printer = &raw["printer"];
    let job = &raw["job"];
    let mut snapshot = PrinterStatusSnapshot::empty(printer_id, Value::Null);

    snapshot.status = match printer["state"].as_str() {
        Some("PRINTING") | Some("BUSY") => PrinterStatus::Printing,
        Some("PAUSED") => PrinterStatus::Paused,
        Some("ERROR") | Some("ATTENTION") => PrinterStatus::Error,
        Some("IDLE") | Some("READY") | Some("FINISHED") | Some("STOPPED") => PrinterStatus::Online,
        _ => PrinterStatus::Unknown,
    };
    snapshot.bed_temperature = printer["temp_bed"].as_f64();
    snapshot.nozzle_temperature = printer["temp_nozzle"].as_f64();
    snapshot.progress = clamp_progress(&job["progress"]);
    snapshot.current_job = job["file"]["display_name"]
        .as_str()
        .or_else(|| job["file"]["name"].as_str())
        .map(str::to_string);

    snapshot.elapsed_minutes = job["time_printing"].as_u64().map(|s| (s / 60) as u32);
    snapshot.remaining_minutes = job["time_remaining"].as_u64().map(|s| (s / 60) as u32);
    if snapshot.remaining_minutes.is_none() {
        // Derive remaining from the estimate only when both inputs exist.
        if let (Some(estimate), Some(elapsed)) = (
            job["estimated_time"].as_u64().map(|s| (s / 60) as u32),
            snapshot.elapsed_minutes,
        ) {
            snapshot.remaining_minutes = Some(estimate.saturating_sub(elapsed));
        }
    }

    if job["thumbnail"].as_bool() == Some(true) {
        if let Some(job_id) = job["id"].as_u64() {
            snapshot.thumbnail_url = Some(thumbnail_path(&job_id.to_string()));
        }
    }

    if let Some(slots) = job["slots"].as_array() {
        for (i, slot) in slots.iter().enumerate() {
            snapshot.filament_slots.push(FilamentSlot {
                index: slot["index"].as_u64().map(|n| n as u8).unwrap_or(i as u8),
                color: slot["color"].as_str().map(str::to_string),
                material: slot["material"].as_str().map(str::to_string),
                active: slot["active"].as_bool().unwrap_or(false),
            });
        }
    }

    snapshot
}

fn normalize_generic(printer_id: &str, raw: &Value) -> PrinterStatusSnapshot {
    let mut snapshot = PrinterStatusSnapshot::empty(printer_id, Value::Null);

    snapshot.status = match raw["state"].as_str() {
        Some("printing") => PrinterStatus::Printing,
        Some("paused") => PrinterStatus::Paused,
        Some("error") => PrinterStatus::Error,
        Some("offline") => PrinterStatus::Offline,
        Some("online") | Some("idle") => PrinterStatus::Online,
        _ => PrinterStatus::Unknown,
    };
    snapshot.bed_temperature = raw["bed_temperature"].as_f64();
    snapshot.nozzle_temperature = raw["nozzle_temperature"].as_f64();
    snapshot.progress = clamp_progress(&raw["progress"]);
    snapshot.current_job = raw["job_name"].as_str().map(str::to_string);
    snapshot.elapsed_minutes = raw["elapsed_minutes"].as_u64().map(|m| m as u32);
    snapshot.remaining_minutes = raw["remaining_minutes"].as_u64().map(|m| m as u32);
    if snapshot.remaining_minutes.is_none() {
        if let (Some(estimate), Some(elapsed)) = (
            raw["estimated_minutes"].as_u64().map(|m| m as u32),
            snapshot.elapsed_minutes,
        ) {
            snapshot.remaining_minutes = Some(estimate.saturating_sub(elapsed));
        }
    }

    if raw["thumbnail"].as_bool() == Some(true) {
        if let Some(job_id) = raw["job_id"].as_str() {
            snapshot.thumbnail_url = Some(thumbnail_path(job_id));
        }
    }

    if let Some(slots) = raw["filament_slots"].as_array() {
        for (i, slot) in slots.iter().enumerate() {
            snapshot.filament_slots.push(FilamentSlot {
                index: slot["index"].as_u64().map(|n| n as u8).unwrap_or(i as u8),
                color: slot["color"].as_str().map(str::to_string),
                material: slot["material"].as_str().map(str::to_string),
                active: slot["active"].as_bool().unwrap_or(false),
            });
        }
    }

    snapshot
}

/// Progress arrives as int, float or garbage; clamp to [0, 100] and
/// floor floats to whole percent. Absent stays absent.
fn clamp_progress(value: &Value) -> Option<u8> {
    let raw = value.as_f64()?;
    Some(raw.clamp(0.0, 100.0).floor() as u8)
}

fn thumbnail_path(job_id: &str) -> String {
    format!("/api/v1/jobs/{job_id}/thumbnail")
}

/// At most one filament slot may be active. A payload marking several is
/// a vendor contract violation: keep the first, warn, keep polling.
fn enforce_single_active_slot(printer_id: &str, slots: &mut [FilamentSlot]) {
    let mut seen_active = false;
    let mut violations = 0usize;
    for slot in slots.iter_mut() {
        if slot.active {
            if seen_active {
                slot.active = false;
                violations += 1;
            }
            seen_active = true;
        }
    }
    if violations > 0 {
        tracing::warn!(
            "printer {}: vendor payload marked {} extra filament slot(s) active, keeping the first",
            printer_id,
            violations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generic_progress_is_clamped() {
        let snap = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "progress": 150}),
        );
        assert_eq!(snap.progress, Some(100));
        assert_eq!(snap.status, PrinterStatus::Printing);
    }

    #[test]
    fn float_progress_is_floored() {
        let snap = normalize(PrinterVendor::PrusaCore, "p1", json!({"job": {"progress": 64.7}}));
        assert_eq!(snap.progress, Some(64));
    }

    #[test]
    fn absent_data_stays_absent() {
        let snap = normalize(PrinterVendor::Unknown, "p1", json!({"state": "idle"}));
        assert_eq!(snap.progress, None);
        assert_eq!(snap.remaining_minutes, None);
        assert_eq!(snap.bed_temperature, None);
        assert_eq!(snap.thumbnail_url, None);
    }

    #[test]
    fn remaining_derived_only_when_both_inputs_exist() {
        let derived = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "elapsed_minutes": 30, "estimated_minutes": 90}),
        );
        assert_eq!(derived.remaining_minutes, Some(60));

        let no_elapsed = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "estimated_minutes": 90}),
        );
        assert_eq!(no_elapsed.remaining_minutes, None);
    }

    #[test]
    fn bambu_state_and_ams_mapping() {
        let snap = normalize(
            PrinterVendor::BambuLab,
            "x1c",
            json!({"print": {
                "gcode_state": "RUNNING",
                "mc_percent": 42,
                "mc_remaining_time": 95,
                "bed_temper": 60.0,
                "nozzle_temper": 220.5,
                "subtask_name": "benchy.3mf",
                "ams": {
                    "tray_now": "1",
                    "tray": [
                        {"id": "0", "tray_color": "FF0000", "tray_type": "PLA"},
                        {"id": "1", "tray_color": "00FF00", "tray_type": "PETG"}
                    ]
                }
            }}),
        );
        assert_eq!(snap.status, PrinterStatus::Printing);
        assert_eq!(snap.progress, Some(42));
        assert_eq!(snap.remaining_minutes, Some(95));
        assert_eq!(snap.current_job.as_deref(), Some("benchy.3mf"));
        let active = snap.active_slot().expect("one active tray");
        assert_eq!(active.index, 1);
        assert_eq!(active.material.as_deref(), Some("PETG"));
    }

    #[test]
    fn multiple_active_slots_keep_first() {
        let snap = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "filament_slots": [
                {"index": 0, "active": true},
                {"index": 1, "active": true},
                {"index": 2, "active": true}
            ]}),
        );
        let active: Vec<_> = snap.filament_slots.iter().filter(|s| s.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].index, 0);
    }

    #[test]
    fn thumbnail_only_when_payload_flags_one() {
        let with = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "thumbnail": true, "job_id": "j-7"}),
        );
        assert_eq!(with.thumbnail_url.as_deref(), Some("/api/v1/jobs/j-7/thumbnail"));

        let without = normalize(
            PrinterVendor::Unknown,
            "p1",
            json!({"state": "printing", "job_id": "j-7"}),
        );
        assert_eq!(without.thumbnail_url, None);
    }

    #[test]
    fn identical_payloads_yield_identical_snapshots() {
        let payload = json!({"print": {"gcode_state": "PAUSE", "mc_percent": 10.9}});
        let a = normalize(PrinterVendor::BambuLab, "p1", payload.clone());
        let b = normalize(PrinterVendor::BambuLab, "p1", payload);
        assert_eq!(a.status, b.status);
        assert_eq!(a.progress, b.progress);
        assert_eq!(a.filament_slots, b.filament_slots);
        assert_eq!(a.raw, b.raw);
    }

    #[test]
    fn prusa_remaining_from_estimate() {
        let snap = normalize(
            PrinterVendor::PrusaCore,
            "mk4",
            json!({
                "printer": {"state": "PRINTING", "temp_bed": 55.0, "temp_nozzle": 210.0},
                "job": {"progress": 50.0, "time_printing": 1800, "estimated_time": 3600}
            }),
        );
        assert_eq!(snap.elapsed_minutes, Some(30));
        assert_eq!(snap.remaining_minutes, Some(30));
    }
}
