use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::foundation::error::{FrameforgeError, FrameforgeResult};

/// Source data for a render run: who is being ranked and how their cumulative
/// values evolve over time.
///
/// The timeline is the boundary input model; [`crate::generator::TimelineSpecGenerator`]
/// turns it into per-frame task specs lazily.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Timeline {
    pub entities: Vec<EntityDef>,
    /// Strictly increasing timestamped steps of cumulative per-entity values.
    pub steps: Vec<TimelineStep>,
    /// Interpolated frames rendered between consecutive steps.
    pub frames_per_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<IntroCard>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EntityDef {
    pub id: String,
    pub label: String,
    pub color: [u8; 3],
    /// Thumbnail path relative to the trusted asset root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimelineStep {
    pub timestamp: DateTime<Utc>,
    /// Cumulative value per entity id. Missing entries are treated as 0.
    pub values: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct IntroCard {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    /// Number of title frames emitted before the chart.
    pub hold_frames: u32,
}

impl Timeline {
    /// Load and validate a timeline from a JSON file.
    pub fn load(path: &Path) -> FrameforgeResult<Self> {
        let f = File::open(path).map_err(|e| {
            FrameforgeError::validation(format!("open timeline '{}': {e}", path.display()))
        })?;
        let timeline: Timeline = serde_json::from_reader(BufReader::new(f)).map_err(|e| {
            FrameforgeError::validation(format!("parse timeline '{}': {e}", path.display()))
        })?;
        timeline.validate()?;
        Ok(timeline)
    }

    pub fn validate(&self) -> FrameforgeResult<()> {
        if self.entities.is_empty() {
            return Err(FrameforgeError::validation(
                "timeline must declare at least one entity",
            ));
        }
        let mut ids = BTreeSet::new();
        for e in &self.entities {
            if e.id.trim().is_empty() {
                return Err(FrameforgeError::validation("entity id must be non-empty"));
            }
            if !ids.insert(e.id.as_str()) {
                return Err(FrameforgeError::validation(format!(
                    "duplicate entity id '{}'",
                    e.id
                )));
            }
            if let Some(art) = &e.art
                && art.trim().is_empty()
            {
                return Err(FrameforgeError::validation(format!(
                    "entity '{}' art path must be non-empty when present",
                    e.id
                )));
            }
        }

        if self.steps.is_empty() {
            return Err(FrameforgeError::validation(
                "timeline must contain at least one step",
            ));
        }
        if self.frames_per_step == 0 {
            return Err(FrameforgeError::validation("frames_per_step must be >= 1"));
        }

        let mut prev_ts: Option<DateTime<Utc>> = None;
        let mut prev_values: BTreeMap<&str, f64> = BTreeMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(prev) = prev_ts
                && step.timestamp <= prev
            {
                return Err(FrameforgeError::validation(format!(
                    "step {i} timestamp must be strictly increasing"
                )));
            }
            prev_ts = Some(step.timestamp);

            for (id, value) in &step.values {
                if !ids.contains(id.as_str()) {
                    return Err(FrameforgeError::validation(format!(
                        "step {i} references unknown entity '{id}'"
                    )));
                }
                if !value.is_finite() || *value < 0.0 {
                    return Err(FrameforgeError::validation(format!(
                        "step {i} value for '{id}' must be finite and >= 0"
                    )));
                }
                let prev = prev_values.get(id.as_str()).copied().unwrap_or(0.0);
                if *value < prev {
                    return Err(FrameforgeError::validation(format!(
                        "step {i} value for '{id}' decreased (values are cumulative)"
                    )));
                }
                prev_values.insert(id.as_str(), *value);
            }
        }

        if let Some(intro) = &self.intro {
            if intro.title.trim().is_empty() {
                return Err(FrameforgeError::validation("intro title must be non-empty"));
            }
            if intro.hold_frames == 0 {
                return Err(FrameforgeError::validation(
                    "intro hold_frames must be >= 1",
                ));
            }
        }

        Ok(())
    }

    /// Total number of task specs this timeline yields.
    pub fn total_frames(&self) -> u64 {
        let intro = self.intro.as_ref().map(|i| i.hold_frames as u64).unwrap_or(0);
        let chart = if self.steps.len() <= 1 {
            1
        } else {
            (self.steps.len() as u64 - 1) * self.frames_per_step as u64 + 1
        };
        intro + chart
    }

    /// Deterministic synthetic timeline for demos and smoke tests.
    ///
    /// Exercises the full pipeline without any external data source.
    pub fn synthetic(steps: usize, entities: usize, frames_per_step: u32) -> Self {
        const PALETTE: [[u8; 3]; 8] = [
            [228, 87, 86],
            [90, 155, 212],
            [250, 180, 100],
            [105, 195, 130],
            [170, 120, 210],
            [230, 140, 180],
            [120, 200, 210],
            [200, 200, 110],
        ];

        let entities: Vec<EntityDef> = (0..entities.max(1))
            .map(|i| EntityDef {
                id: format!("entity_{:02}", i + 1),
                label: format!("Entity {:02}", i + 1),
                color: PALETTE[i % PALETTE.len()],
                art: None,
            })
            .collect();

        // Small xorshift keeps the stub deterministic but uneven enough that
        // rank swaps actually happen.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 17) as f64
        };

        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        let base = epoch.unwrap_or_else(Utc::now);
        let mut cumulative: BTreeMap<String, f64> =
            entities.iter().map(|e| (e.id.clone(), 0.0)).collect();
        let steps = (0..steps.max(1))
            .map(|i| {
                for e in &entities {
                    let inc = rand();
                    if let Some(v) = cumulative.get_mut(&e.id) {
                        *v += inc;
                    }
                }
                TimelineStep {
                    timestamp: base + Duration::days(i as i64),
                    values: cumulative.clone(),
                }
            })
            .collect();

        Timeline {
            entities,
            steps,
            frames_per_step: frames_per_step.max(1),
            intro: Some(IntroCard {
                title: "frameforge demo".to_string(),
                subtitle: "synthetic timeline".to_string(),
                hold_frames: 2,
            }),
        }
    }
}
