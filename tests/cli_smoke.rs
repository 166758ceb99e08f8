//! End-to-end runs of the `frameforge` binary with real worker processes:
//! timeline-stub into render, fault plans crossing the process boundary, and
//! crash containment.

use std::path::PathBuf;
use std::process::Command;

use frameforge::{FrameStatus, RunOutcome, RunReport};

fn bin() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_frameforge")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "frameforge.exe"
            } else {
                "frameforge"
            });
            p
        })
}

fn smoke_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("cli_smoke").join(tag);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_stub_timeline(dir: &PathBuf, steps: u32, entities: u32) -> PathBuf {
    let timeline = dir.join("timeline.json");
    let status = Command::new(bin())
        .args([
            "timeline-stub",
            "--steps",
            &steps.to_string(),
            "--entities",
            &entities.to_string(),
            "--frames-per-step",
            "2",
            "--out",
        ])
        .arg(&timeline)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(timeline.exists());
    timeline
}

fn read_report(path: &PathBuf) -> RunReport {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn stub_then_render_produces_frames_and_a_report() {
    let dir = smoke_dir("happy");
    let timeline = write_stub_timeline(&dir, 4, 3);
    let frames = dir.join("frames");
    let report_path = dir.join("report.json");

    let status = Command::new(bin())
        .args(["render", "--timeline"])
        .arg(&timeline)
        .args(["--out-dir"])
        .arg(&frames)
        .args(["--width", "64", "--height", "64", "--workers", "2", "--report"])
        .arg(&report_path)
        .status()
        .unwrap();
    assert!(status.success());

    let report = read_report(&report_path);
    let (rendered, skipped) = match report.outcome {
        RunOutcome::Completed { rendered, skipped } => (rendered, skipped),
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(rendered > 0);
    assert_eq!(skipped, 0);
    assert_eq!(report.records.len() as u64, rendered);

    for artifact in report.artifacts() {
        assert!(artifact.path.exists(), "missing {:?}", artifact.path);
    }
}

#[test]
fn fault_plan_crosses_the_process_boundary() {
    let dir = smoke_dir("faults");
    let timeline = write_stub_timeline(&dir, 4, 3);
    let frames = dir.join("frames");
    let report_path = dir.join("report.json");

    // Frame 2 fails frame-fatally inside the worker process; frame 3 needs a
    // retry first.
    let plan = dir.join("faults.json");
    std::fs::write(
        &plan,
        r#"{"rules":[
            {"index":2,"action":{"fail":{"class":"frame_fatal"}}},
            {"index":3,"first_attempts":1,"action":{"fail":{"class":"transient"}}}
        ]}"#,
    )
    .unwrap();

    let status = Command::new(bin())
        .args(["render", "--timeline"])
        .arg(&timeline)
        .args(["--out-dir"])
        .arg(&frames)
        .args(["--width", "64", "--height", "64", "--workers", "2", "--fault-plan"])
        .arg(&plan)
        .args(["--report"])
        .arg(&report_path)
        .status()
        .unwrap();
    // Skips do not fail the run.
    assert!(status.success());

    let report = read_report(&report_path);
    match report.outcome {
        RunOutcome::Completed { skipped, .. } => assert_eq!(skipped, 1),
        other => panic!("expected completion, got {other:?}"),
    }
    let r2 = report.records.iter().find(|r| r.index.0 == 2).unwrap();
    assert_eq!(r2.status, FrameStatus::SkippedFatal);
    let r3 = report.records.iter().find(|r| r.index.0 == 3).unwrap();
    assert_eq!(r3.status, FrameStatus::Completed);
    assert_eq!(r3.attempts, 2);
}

#[test]
fn worker_crash_is_contained_below_the_breaker_threshold() {
    let dir = smoke_dir("crash");
    let timeline = write_stub_timeline(&dir, 4, 3);
    let frames = dir.join("frames");
    let report_path = dir.join("report.json");

    // One scripted abort: the worker process dies mid-task, the coordinator
    // replaces it and the run still completes.
    let plan = dir.join("faults.json");
    std::fs::write(&plan, r#"{"rules":[{"index":1,"action":"crash"}]}"#).unwrap();

    let status = Command::new(bin())
        .args(["render", "--timeline"])
        .arg(&timeline)
        .args(["--out-dir"])
        .arg(&frames)
        .args([
            "--width",
            "64",
            "--height",
            "64",
            "--workers",
            "2",
            "--breaker-threshold",
            "5",
            "--fault-plan",
        ])
        .arg(&plan)
        .args(["--report"])
        .arg(&report_path)
        .status()
        .unwrap();
    assert!(status.success());

    let report = read_report(&report_path);
    match report.outcome {
        RunOutcome::Completed { skipped, .. } => assert_eq!(skipped, 1),
        other => panic!("expected completion, got {other:?}"),
    }
    let r1 = report.records.iter().find(|r| r.index.0 == 1).unwrap();
    assert_eq!(r1.status, FrameStatus::SkippedFatal);
    assert!(report.stats.worker_failures >= 1);
}

#[test]
fn breaker_trip_exits_nonzero() {
    let dir = smoke_dir("trip");
    let timeline = write_stub_timeline(&dir, 6, 3);
    let frames = dir.join("frames");
    let report_path = dir.join("report.json");

    // Every early frame crashes its worker; with a threshold of 3 the run
    // must abort instead of chewing through replacements.
    let plan = dir.join("faults.json");
    std::fs::write(
        &plan,
        r#"{"rules":[
            {"index":0,"action":"crash"},
            {"index":1,"action":"crash"},
            {"index":2,"action":"crash"},
            {"index":3,"action":"crash"}
        ]}"#,
    )
    .unwrap();

    let output = Command::new(bin())
        .args(["render", "--timeline"])
        .arg(&timeline)
        .args(["--out-dir"])
        .arg(&frames)
        .args([
            "--width",
            "64",
            "--height",
            "64",
            "--workers",
            "2",
            "--breaker-threshold",
            "3",
            "--grace",
            "1",
            "--fault-plan",
        ])
        .arg(&plan)
        .args(["--report"])
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(!output.status.success());

    // The report is written before the outcome decides the exit code.
    let report = read_report(&report_path);
    match report.outcome {
        RunOutcome::AbortedWorkerFatal { threshold, .. } => assert_eq!(threshold, 3),
        other => panic!("expected breaker abort, got {other:?}"),
    }
}

#[test]
fn serial_mode_renders_in_process() {
    let dir = smoke_dir("serial");
    let timeline = write_stub_timeline(&dir, 3, 2);
    let frames = dir.join("frames");
    let report_path = dir.join("report.json");

    let status = Command::new(bin())
        .args(["render", "--timeline"])
        .arg(&timeline)
        .args(["--out-dir"])
        .arg(&frames)
        .args(["--width", "64", "--height", "64", "--workers", "2", "--serial", "--report"])
        .arg(&report_path)
        .status()
        .unwrap();
    assert!(status.success());

    let report = read_report(&report_path);
    assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
    assert!(report.artifacts().count() > 0);
}
