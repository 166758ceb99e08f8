use chrono::{DateTime, Utc};

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{FrameforgeError, FrameforgeResult};

/// Immutable description of one unit of render work.
///
/// A spec is fully serializable (it crosses the worker process boundary) and
/// never references shared mutable state; everything the renderer needs is in
/// the payload or in the shared read-only `RenderConfig`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskSpec {
    /// Unique, strictly increasing sequence index.
    pub index: FrameIndex,
    /// Ordering key in source-data time.
    pub timestamp: DateTime<Utc>,
    pub payload: FramePayload,
}

/// Closed set of payload shapes the renderer understands.
///
/// Validation is exhaustive at this boundary; rendering code never re-checks.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FramePayload {
    Chart(ChartFrame),
    Card(TitleCard),
}

/// One ranked-bar chart frame.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ChartFrame {
    /// Bars in rank order (position 0 at the top). Already interpolated.
    pub bars: Vec<BarRow>,
    /// Rolling-window highlight rows (e.g. top entity of the last 7/30 days).
    pub highlights: Vec<Highlight>,
    /// Human-readable timestamp strip label.
    pub timestamp_label: String,
    /// Value that maps to a full-width bar. Constant across the run so bar
    /// lengths are comparable frame to frame.
    pub max_value: f64,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BarRow {
    pub entity: String,
    pub label: String,
    /// Interpolated cumulative value, `>= 0` and finite.
    pub value: f64,
    /// Vertical slot, fractional during rank transitions. May sit below the
    /// visible rows while a new entry slides in.
    pub position: f64,
    pub color: [u8; 3],
    /// Thumbnail path relative to the trusted asset root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
    /// Entity entered the ranking this frame (rendered faded-in).
    #[serde(default)]
    pub is_new: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Highlight {
    /// Window length in days (7 or 30 in the built-in generator).
    pub window_days: u32,
    pub entity: String,
    pub label: String,
    pub value: f64,
}

/// Intro/outro title frame.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TitleCard {
    pub title: String,
    pub subtitle: String,
    /// Reveal progress in `[0, 1]`.
    pub progress: f64,
}

/// What the manager actually hands to a worker: the spec plus per-attempt
/// bookkeeping the renderer needs (attempt number for diagnostics, pad width
/// for deterministic artifact naming).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskEnvelope {
    pub spec: TaskSpec,
    /// 1-based attempt number for this dispatch.
    pub attempt: u32,
    /// Zero-pad width derived from the run's total task count.
    pub pad_width: usize,
}

impl TaskSpec {
    /// Exhaustive boundary validation of the payload.
    pub fn validate(&self) -> FrameforgeResult<()> {
        match &self.payload {
            FramePayload::Chart(chart) => chart.validate(self.index),
            FramePayload::Card(card) => card.validate(self.index),
        }
    }
}

impl ChartFrame {
    fn validate(&self, index: FrameIndex) -> FrameforgeResult<()> {
        if !self.max_value.is_finite() || self.max_value <= 0.0 {
            return Err(FrameforgeError::validation(format!(
                "spec {index}: chart max_value must be finite and > 0"
            )));
        }
        for bar in &self.bars {
            if bar.entity.trim().is_empty() {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: bar entity id must be non-empty"
                )));
            }
            if !bar.value.is_finite() || bar.value < 0.0 {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: bar '{}' value must be finite and >= 0",
                    bar.entity
                )));
            }
            if !bar.position.is_finite() {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: bar '{}' position must be finite",
                    bar.entity
                )));
            }
            if let Some(art) = &bar.art
                && art.trim().is_empty()
            {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: bar '{}' art path must be non-empty when present",
                    bar.entity
                )));
            }
        }
        for h in &self.highlights {
            if h.window_days == 0 {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: highlight window_days must be > 0"
                )));
            }
            if h.entity.trim().is_empty() {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: highlight entity id must be non-empty"
                )));
            }
            if !h.value.is_finite() || h.value < 0.0 {
                return Err(FrameforgeError::validation(format!(
                    "spec {index}: highlight '{}' value must be finite and >= 0",
                    h.entity
                )));
            }
        }
        Ok(())
    }
}

impl TitleCard {
    fn validate(&self, index: FrameIndex) -> FrameforgeResult<()> {
        if self.title.trim().is_empty() {
            return Err(FrameforgeError::validation(format!(
                "spec {index}: card title must be non-empty"
            )));
        }
        if !self.progress.is_finite() || !(0.0..=1.0).contains(&self.progress) {
            return Err(FrameforgeError::validation(format!(
                "spec {index}: card progress must be within [0, 1]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_spec() -> TaskSpec {
        TaskSpec {
            index: FrameIndex(3),
            timestamp: Utc::now(),
            payload: FramePayload::Chart(ChartFrame {
                bars: vec![BarRow {
                    entity: "e1".to_string(),
                    label: "Entity One".to_string(),
                    value: 10.0,
                    position: 0.0,
                    color: [200, 40, 40],
                    art: None,
                    is_new: false,
                }],
                highlights: vec![Highlight {
                    window_days: 7,
                    entity: "e1".to_string(),
                    label: "Entity One".to_string(),
                    value: 4.0,
                }],
                timestamp_label: "2024-01-05".to_string(),
                max_value: 100.0,
            }),
        }
    }

    #[test]
    fn chart_spec_round_trips_as_tagged_json() {
        let spec = chart_spec();
        let s = serde_json::to_string(&spec).unwrap();
        assert!(s.contains("\"kind\":\"chart\""));
        let back: TaskSpec = serde_json::from_str(&s).unwrap();
        assert_eq!(back.index, FrameIndex(3));
        back.validate().unwrap();
    }

    #[test]
    fn validate_rejects_nonfinite_bar_value() {
        let mut spec = chart_spec();
        if let FramePayload::Chart(chart) = &mut spec.payload {
            chart.bars[0].value = f64::NAN;
        }
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_entity() {
        let mut spec = chart_spec();
        if let FramePayload::Chart(chart) = &mut spec.payload {
            chart.bars[0].entity = "  ".to_string();
        }
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_card_progress_out_of_range() {
        let spec = TaskSpec {
            index: FrameIndex(0),
            timestamp: Utc::now(),
            payload: FramePayload::Card(TitleCard {
                title: "t".to_string(),
                subtitle: String::new(),
                progress: 1.5,
            }),
        };
        assert!(spec.validate().is_err());
    }
}
