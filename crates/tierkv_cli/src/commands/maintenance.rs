//! Compaction and media class commands.

use super::{check_format, open, CommandResult};
use serde::Serialize;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tierkv_core::{CompactFlags, CompactStatus, ErrorKind, MediaClass, Runtime};

/// Poll interval while waiting for a pass to finish.
const WAIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
struct StatusReport {
    samp_lwm: u32,
    samp_hwm: u32,
    samp_curr: u32,
    active: bool,
    canceled: bool,
}

impl From<CompactStatus> for StatusReport {
    fn from(status: CompactStatus) -> Self {
        Self {
            samp_lwm: status.samp_lwm,
            samp_hwm: status.samp_hwm,
            samp_curr: status.samp_curr,
            active: status.active,
            canceled: status.canceled,
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassReport {
    class: String,
    path: String,
    allocated_bytes: u64,
    used_bytes: u64,
}

/// Runs the compact command.
pub fn compact(rt: &Runtime, path: &Path, cancel: bool, samp_lwm: bool, wait: bool) -> CommandResult {
    let db = open(rt, path, false)?;
    let before = db.compact_status()?;
    db.compact(CompactFlags { cancel, samp_lwm })?;
    tracing::info!(
        path = %path.display(),
        cancel,
        samp_lwm,
        samp = before.samp_curr,
        "requested compaction"
    );
    println!("Compaction requested (samp {}%)", before.samp_curr);

    if wait && !cancel {
        // The pass may not have started yet when the first poll runs.
        thread::sleep(WAIT_POLL);
        while db.compact_status()?.active {
            thread::sleep(WAIT_POLL);
        }
        let after = db.compact_status()?;
        tracing::info!(canceled = after.canceled, samp = after.samp_curr, "compaction settled");
        println!(
            "Compaction {} (samp {}%)",
            if after.canceled { "canceled" } else { "finished" },
            after.samp_curr
        );
    }
    db.close()?;
    Ok(())
}

/// Runs the compact-status command.
pub fn compact_status(rt: &Runtime, path: &Path, format: &str) -> CommandResult {
    let json = check_format(format)?;
    let db = open(rt, path, true)?;
    let status = StatusReport::from(db.compact_status()?);
    db.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Compaction Status:");
        println!("  Low watermark:  {}%", status.samp_lwm);
        println!("  High watermark: {}%", status.samp_hwm);
        println!("  Current samp:   {}%", status.samp_curr);
        println!("  Active:         {}", status.active);
        println!("  Canceled:       {}", status.canceled);
    }
    Ok(())
}

/// Runs the mclass-info command.
pub fn mclass_info(rt: &Runtime, path: &Path, class: Option<&str>, format: &str) -> CommandResult {
    let json = check_format(format)?;
    let db = open(rt, path, true)?;

    let implicit = class.is_none();
    let classes = match class {
        Some(name) => vec![name.parse::<MediaClass>()?],
        None => MediaClass::ALL.to_vec(),
    };
    let mut reports = Vec::new();
    for class in classes {
        match db.mclass_info(class) {
            Ok(info) => reports.push(ClassReport {
                class: class.to_string(),
                path: info.path.display().to_string(),
                allocated_bytes: info.allocated_bytes,
                used_bytes: info.used_bytes,
            }),
            Err(e) if implicit && e.kind() == ErrorKind::NotSupported => {}
            Err(e) => return Err(e.into()),
        }
    }
    db.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}:", report.class);
            println!("  Path:      {}", report.path);
            println!("  Allocated: {} bytes", report.allocated_bytes);
            println!("  Used:      {} bytes", report.used_bytes);
        }
    }
    Ok(())
}

