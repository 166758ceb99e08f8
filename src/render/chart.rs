use std::time::Instant;

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::config::RenderConfig;
use crate::foundation::core::artifact_file_name;
use crate::foundation::error::RenderFailure;
use crate::render::paths::resolve_asset_path;
use crate::render::{ArtifactHandle, FrameRenderer};
use crate::spec::{ChartFrame, FramePayload, TaskEnvelope, TitleCard};

/// Built-in geometry-only renderer for ranked-bar chart frames and title
/// cards.
///
/// Draws directly into an RGBA buffer and writes one PNG per call. No font
/// stack; labels are rendered as color chips. Thumbnails are loaded from the
/// trusted asset root after path validation.
#[derive(Debug, Default)]
pub struct ChartRenderer;

impl ChartRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl FrameRenderer for ChartRenderer {
    fn render(
        &self,
        task: &TaskEnvelope,
        config: &RenderConfig,
    ) -> Result<ArtifactHandle, RenderFailure> {
        let started = Instant::now();

        task.spec
            .validate()
            .map_err(|e| RenderFailure::frame_fatal(e.to_string()))?;
        config
            .validate()
            .map_err(|e| RenderFailure::frame_fatal(e.to_string()))?;

        let mut img = RgbaImage::from_pixel(config.width, config.height, Rgba(config.background));
        match &task.spec.payload {
            FramePayload::Chart(chart) => draw_chart(&mut img, chart, config)?,
            FramePayload::Card(card) => draw_card(&mut img, card, config),
        }

        let path = config
            .out_dir
            .join(artifact_file_name(task.spec.index, task.pad_width));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RenderFailure::transient(format!(
                    "create output dir '{}': {e}",
                    parent.display()
                ))
            })?;
        }
        img.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| RenderFailure::transient(format!("write '{}': {e}", path.display())))?;

        let bytes = std::fs::metadata(&path)
            .map_err(|e| RenderFailure::transient(format!("stat '{}': {e}", path.display())))?
            .len();

        debug!(
            index = task.spec.index.0,
            attempt = task.attempt,
            bytes,
            "rendered frame"
        );
        Ok(ArtifactHandle {
            path,
            bytes,
            render_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn draw_chart(
    img: &mut RgbaImage,
    chart: &ChartFrame,
    config: &RenderConfig,
) -> Result<(), RenderFailure> {
    let w = config.width as f64;
    let h = config.height as f64;

    // Left 30% carries the highlight panel and label chips; bars fill the
    // rest, with a thin timestamp strip along the bottom.
    let plot_x0 = w * 0.30;
    let plot_x1 = w * 0.98;
    let plot_y0 = h * 0.04;
    let plot_y1 = h * 0.90;
    let row_h = (plot_y1 - plot_y0) / config.max_bars as f64;

    for bar in &chart.bars {
        let y = plot_y0 + bar.position * row_h;
        if y + row_h < plot_y0 || y > plot_y1 {
            continue;
        }
        let bar_h = row_h * 0.72;
        let frac = (bar.value / chart.max_value).clamp(0.0, 1.0);
        let len = (plot_x1 - plot_x0) * frac;
        let alpha = if bar.is_new { 140 } else { 255 };

        blend_rect(img, plot_x0, y, len.max(1.0), bar_h, bar.color, alpha);
        // Label chip in entity color left of the bar.
        blend_rect(img, w * 0.22, y, w * 0.06, bar_h, bar.color, alpha);

        if let Some(art) = &bar.art
            && let Some(root) = &config.art_root
        {
            let resolved = resolve_asset_path(art, root)?;
            let thumb_edge = bar_h.max(1.0) as u32;
            let decoded = image::open(&resolved).map_err(|e| classify_image_error(art, e))?;
            let thumb = image::imageops::thumbnail(&decoded.to_rgba8(), thumb_edge, thumb_edge);
            image::imageops::overlay(img, &thumb, plot_x0 as i64, y as i64);
            // `decoded` and `thumb` drop here; nothing outlives the call.
        }
    }

    // Highlight panel rows under the label column.
    let panel_x0 = w * 0.02;
    let panel_w = w * 0.18;
    let hl_max = chart
        .highlights
        .iter()
        .map(|h| h.value)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    for (i, hl) in chart.highlights.iter().enumerate() {
        let y = h * 0.70 + i as f64 * h * 0.08;
        let frac = (hl.value / hl_max).clamp(0.0, 1.0);
        blend_rect(img, panel_x0, y, panel_w * frac, h * 0.05, [235, 235, 235], 200);
    }

    // Timestamp strip.
    blend_rect(img, 0.0, h * 0.94, w, h * 0.02, [60, 64, 80], 255);
    Ok(())
}

fn draw_card(img: &mut RgbaImage, card: &TitleCard, config: &RenderConfig) {
    let w = config.width as f64;
    let h = config.height as f64;
    let alpha = (card.progress.clamp(0.0, 1.0) * 255.0) as u8;

    // Title block, subtitle block, reveal bar.
    blend_rect(img, w * 0.20, h * 0.38, w * 0.60, h * 0.10, [235, 235, 235], alpha);
    if !card.subtitle.is_empty() {
        blend_rect(img, w * 0.30, h * 0.52, w * 0.40, h * 0.05, [180, 184, 200], alpha);
    }
    blend_rect(
        img,
        w * 0.20,
        h * 0.64,
        w * 0.60 * card.progress.clamp(0.0, 1.0),
        h * 0.015,
        [90, 155, 212],
        255,
    );
}

/// Src-over blend of an axis-aligned rect, clipped to the image.
fn blend_rect(img: &mut RgbaImage, x: f64, y: f64, rect_w: f64, rect_h: f64, rgb: [u8; 3], alpha: u8) {
    if rect_w <= 0.0 || rect_h <= 0.0 || alpha == 0 {
        return;
    }
    let (iw, ih) = (img.width() as i64, img.height() as i64);
    let x0 = (x.floor() as i64).clamp(0, iw);
    let y0 = (y.floor() as i64).clamp(0, ih);
    let x1 = ((x + rect_w).ceil() as i64).clamp(0, iw);
    let y1 = ((y + rect_h).ceil() as i64).clamp(0, ih);

    let a = alpha as u16;
    let inv = 255 - a;
    for py in y0..y1 {
        for px in x0..x1 {
            let p = img.get_pixel_mut(px as u32, py as u32);
            for c in 0..3 {
                let src = rgb[c] as u16;
                let dst = p.0[c] as u16;
                p.0[c] = ((src * a + dst * inv + 127) / 255) as u8;
            }
            p.0[3] = 255;
        }
    }
}

fn classify_image_error(art: &str, err: image::ImageError) -> RenderFailure {
    match &err {
        image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            RenderFailure::transient(format!("asset '{art}' not yet present: {io}"))
        }
        image::ImageError::IoError(io) => {
            RenderFailure::transient(format!("asset '{art}' io error: {io}"))
        }
        image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
            RenderFailure::frame_fatal(format!("asset '{art}' is not a decodable image: {err}"))
        }
        // Decode limits are a resource-exhaustion signal for this worker.
        image::ImageError::Limits(_) => {
            RenderFailure::worker_fatal(format!("asset '{art}' exceeded decode limits: {err}"))
        }
        _ => RenderFailure::transient(format!("asset '{art}': {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::FrameIndex;
    use crate::foundation::error::FailureClass;
    use crate::spec::{BarRow, TaskSpec};
    use chrono::Utc;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("frameforge_chart_{}_{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn chart_envelope(index: u64, art: Option<String>) -> TaskEnvelope {
        TaskEnvelope {
            spec: TaskSpec {
                index: FrameIndex(index),
                timestamp: Utc::now(),
                payload: FramePayload::Chart(ChartFrame {
                    bars: vec![BarRow {
                        entity: "e1".to_string(),
                        label: "Entity One".to_string(),
                        value: 40.0,
                        position: 0.0,
                        color: [228, 87, 86],
                        art,
                        is_new: false,
                    }],
                    highlights: vec![],
                    timestamp_label: "2024-01-02".to_string(),
                    max_value: 100.0,
                }),
            },
            attempt: 1,
            pad_width: 3,
        }
    }

    #[test]
    fn writes_one_png_at_the_padded_path() {
        let out = temp_dir("png");
        let config = RenderConfig::new(&out, 64, 48);
        let handle = ChartRenderer::new()
            .render(&chart_envelope(7, None), &config)
            .unwrap();
        assert!(handle.path.ends_with("frame_007.png"));
        assert!(handle.path.exists());
        assert!(handle.bytes > 0);
        let decoded = image::open(&handle.path).unwrap();
        assert_eq!(decoded.width(), 64);
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn card_render_writes_png() {
        let out = temp_dir("card");
        let config = RenderConfig::new(&out, 64, 48);
        let env = TaskEnvelope {
            spec: TaskSpec {
                index: FrameIndex(0),
                timestamp: Utc::now(),
                payload: FramePayload::Card(TitleCard {
                    title: "t".to_string(),
                    subtitle: "s".to_string(),
                    progress: 0.5,
                }),
            },
            attempt: 1,
            pad_width: 2,
        };
        let handle = ChartRenderer::new().render(&env, &config).unwrap();
        assert!(handle.path.ends_with("frame_00.png"));
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn traversal_art_path_is_frame_fatal() {
        let out = temp_dir("traversal");
        let config = RenderConfig::new(&out, 64, 48).with_art_root(&out);
        let err = ChartRenderer::new()
            .render(&chart_envelope(1, Some("../escape.png".to_string())), &config)
            .unwrap_err();
        assert_eq!(err.class, FailureClass::FrameFatal);
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn missing_art_is_transient() {
        let out = temp_dir("missing_art");
        let config = RenderConfig::new(&out, 64, 48).with_art_root(&out);
        let err = ChartRenderer::new()
            .render(&chart_envelope(1, Some("cover.png".to_string())), &config)
            .unwrap_err();
        assert_eq!(err.class, FailureClass::Transient);
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn undecodable_art_is_frame_fatal() {
        let out = temp_dir("bad_art");
        std::fs::write(out.join("cover.png"), b"not a png at all").unwrap();
        let config = RenderConfig::new(&out, 64, 48).with_art_root(&out);
        let err = ChartRenderer::new()
            .render(&chart_envelope(1, Some("cover.png".to_string())), &config)
            .unwrap_err();
        assert_eq!(err.class, FailureClass::FrameFatal);
        std::fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn invalid_spec_is_frame_fatal() {
        let out = temp_dir("invalid");
        let config = RenderConfig::new(&out, 64, 48);
        let mut env = chart_envelope(1, None);
        if let FramePayload::Chart(chart) = &mut env.spec.payload {
            chart.max_value = f64::NAN;
        }
        let err = ChartRenderer::new().render(&env, &config).unwrap_err();
        assert_eq!(err.class, FailureClass::FrameFatal);
        std::fs::remove_dir_all(&out).unwrap();
    }
}
