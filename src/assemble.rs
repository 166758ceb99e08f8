//! Ordered reassembly of rendered frame artifacts into a video file.
//!
//! Drives the system `ffmpeg` binary through its concat demuxer: each
//! artifact is listed with an explicit duration, so runs with skipped frames
//! still produce a well-formed video (time simply advances to the next
//! available frame). Using the system binary avoids native FFmpeg dev
//! header/lib requirements.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::foundation::error::{FrameforgeError, FrameforgeResult};
use crate::pool::RunReport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    Vp9,
}

impl VideoCodec {
    fn encoder_args(self) -> &'static [&'static str] {
        match self {
            VideoCodec::H264 => &["-c:v", "libx264", "-pix_fmt", "yuv420p"],
            VideoCodec::Vp9 => &["-c:v", "libvpx-vp9", "-b:v", "0"],
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VideoSettings {
    pub fps: u32,
    pub codec: VideoCodec,
    /// Constant-quality factor. Sensible range is 0..=51 for h264 and
    /// 0..=63 for vp9; lower is higher quality.
    pub crf: u32,
    pub out_path: PathBuf,
}

impl VideoSettings {
    pub fn new(out_path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            fps,
            codec: VideoCodec::H264,
            crf: 20,
            out_path: out_path.into(),
        }
    }

    pub fn validate(&self) -> FrameforgeResult<()> {
        if self.fps == 0 {
            return Err(FrameforgeError::validation("video fps must be non-zero"));
        }
        let crf_max = match self.codec {
            VideoCodec::H264 => 51,
            VideoCodec::Vp9 => 63,
        };
        if self.crf > crf_max {
            return Err(FrameforgeError::validation(format!(
                "crf {} out of range for {:?} (max {crf_max})",
                self.crf, self.codec
            )));
        }
        if self.out_path.as_os_str().is_empty() {
            return Err(FrameforgeError::validation("out_path must be non-empty"));
        }
        Ok(())
    }
}

pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn ensure_parent_dir(path: &Path) -> FrameforgeResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Concat-demuxer input list. Single quotes in paths are escaped the way the
/// demuxer expects (`'` -> `'\''`).
fn concat_list(artifacts: &[&Path], frame_duration: f64) -> FrameforgeResult<String> {
    let mut list = String::new();
    for path in artifacts {
        let text = path
            .to_str()
            .ok_or_else(|| {
                FrameforgeError::encode(format!(
                    "artifact path '{}' is not valid UTF-8",
                    path.display()
                ))
            })?
            .replace('\'', "'\\''");
        list.push_str(&format!("file '{text}'\nduration {frame_duration:.6}\n"));
    }
    // The concat demuxer ignores the duration of the final entry unless the
    // file is repeated.
    if let Some(last) = artifacts.last() {
        let text = last
            .to_str()
            .ok_or_else(|| FrameforgeError::encode("artifact path is not valid UTF-8"))?
            .replace('\'', "'\\''");
        list.push_str(&format!("file '{text}'\n"));
    }
    Ok(list)
}

/// Assemble every completed artifact in the report, in sequence order, into
/// `settings.out_path`. Skipped frames leave no gap: playback advances
/// directly to the next completed frame.
pub fn assemble_video(report: &RunReport, settings: &VideoSettings) -> FrameforgeResult<PathBuf> {
    settings.validate()?;

    let artifacts: Vec<&Path> = report.artifacts().map(|a| a.path.as_path()).collect();
    if artifacts.is_empty() {
        return Err(FrameforgeError::encode(
            "no completed artifacts to assemble",
        ));
    }
    let skipped = report.skipped().count();
    if skipped > 0 {
        warn!(skipped, "assembling with skipped frames; timeline will jump");
    }

    if !ffmpeg_available() {
        return Err(FrameforgeError::encode(
            "ffmpeg is required for video assembly, but was not found on PATH",
        ));
    }

    ensure_parent_dir(&settings.out_path)?;

    let list = concat_list(&artifacts, 1.0 / settings.fps as f64)?;
    let list_path = std::env::temp_dir().join(format!(
        "frameforge_concat_{}_{}.txt",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ));
    {
        let mut file = std::fs::File::create(&list_path).map_err(|e| {
            FrameforgeError::encode(format!(
                "create concat list '{}': {e}",
                list_path.display()
            ))
        })?;
        file.write_all(list.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| FrameforgeError::encode(format!("write concat list: {e}")))?;
    }

    let result = run_ffmpeg(&list_path, settings, artifacts.len());
    let _ = std::fs::remove_file(&list_path);
    result?;

    info!(
        frames = artifacts.len(),
        out = %settings.out_path.display(),
        "video assembled"
    );
    Ok(settings.out_path.clone())
}

fn run_ffmpeg(list_path: &Path, settings: &VideoSettings, frames: usize) -> FrameforgeResult<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    cmd.args(["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .args(settings.codec.encoder_args())
        .args(["-crf", &settings.crf.to_string()])
        .args(["-r", &settings.fps.to_string()])
        .args(["-movflags", "+faststart"])
        .arg(&settings.out_path);

    info!(frames, fps = settings.fps, "invoking ffmpeg concat assembly");

    let child = cmd.spawn().map_err(|e| {
        FrameforgeError::encode(format!(
            "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
        ))
    })?;

    let output = child
        .wait_with_output()
        .map_err(|e| FrameforgeError::encode(format!("failed to wait for ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FrameforgeError::encode(format!(
            "ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_validation_catches_bad_values() {
        assert!(VideoSettings::new("out.mp4", 0).validate().is_err());

        let mut settings = VideoSettings::new("out.mp4", 30);
        settings.crf = 52;
        assert!(settings.validate().is_err());
        settings.codec = VideoCodec::Vp9;
        assert!(settings.validate().is_ok());
        settings.crf = 64;
        assert!(settings.validate().is_err());

        let mut settings = VideoSettings::new("", 30);
        settings.out_path = PathBuf::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn concat_list_orders_and_escapes() {
        let a = PathBuf::from("frames/frame_00.png");
        let b = PathBuf::from("frames/it's_here.png");
        let list = concat_list(&[a.as_path(), b.as_path()], 1.0 / 30.0).unwrap();
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines[0], "file 'frames/frame_00.png'");
        assert!(lines[1].starts_with("duration 0.0333"));
        assert_eq!(lines[2], "file 'frames/it'\\''s_here.png'");
        // Final entry repeated so its duration is honored.
        assert_eq!(lines.last().copied(), Some("file 'frames/it'\\''s_here.png'"));
    }

    #[test]
    fn codec_args_select_encoder() {
        assert!(VideoCodec::H264.encoder_args().contains(&"libx264"));
        assert!(VideoCodec::Vp9.encoder_args().contains(&"libvpx-vp9"));
    }

    #[test]
    fn empty_report_is_an_error() {
        let report = RunReport {
            outcome: crate::pool::RunOutcome::Completed {
                rendered: 0,
                skipped: 0,
            },
            records: vec![],
            stats: Default::default(),
        };
        let err = assemble_video(&report, &VideoSettings::new("out.mp4", 30)).unwrap_err();
        assert!(err.to_string().contains("no completed artifacts"));
    }
}
