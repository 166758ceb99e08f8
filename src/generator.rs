use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{FrameforgeError, FrameforgeResult};
use crate::spec::{BarRow, ChartFrame, FramePayload, Highlight, TaskSpec, TitleCard};
use crate::timeline::Timeline;

/// Lazy, finite, forward-only source of task specs.
///
/// `next_spec` yields specs in strictly increasing index order with bounded
/// per-call latency (pure computation, no I/O). Implementations keep O(window)
/// state, never O(sequence length).
pub trait SpecSource {
    fn next_spec(&mut self) -> FrameforgeResult<Option<TaskSpec>>;

    /// Restart iteration from the beginning.
    fn reset(&mut self);

    /// `(produced, total)` counters for progress reporting.
    fn progress(&self) -> (u64, u64);
}

/// In-memory source over pre-built specs. Used by embedders and tests that
/// script exact sequences.
pub struct SequenceSource {
    specs: Vec<TaskSpec>,
    cursor: usize,
}

impl SequenceSource {
    pub fn new(specs: Vec<TaskSpec>) -> Self {
        Self { specs, cursor: 0 }
    }
}

impl SpecSource for SequenceSource {
    fn next_spec(&mut self) -> FrameforgeResult<Option<TaskSpec>> {
        let Some(spec) = self.specs.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(spec.clone()))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn progress(&self) -> (u64, u64) {
        (self.cursor as u64, self.specs.len() as u64)
    }
}

/// How far a bar moves toward its target rank per emitted frame.
const POSITION_SMOOTHING: f64 = 0.3;

const SHORT_WINDOW_DAYS: i64 = 7;
const LONG_WINDOW_DAYS: i64 = 30;

/// Streams chart frames out of a [`Timeline`].
///
/// Interpolates cumulative values between consecutive steps with smoothstep
/// easing, ranks the top entities per frame, and keeps bar positions
/// continuous across frames so rank changes animate instead of jumping.
/// Rolling per-step increments are kept for at most [`LONG_WINDOW_DAYS`] of
/// source time to derive the 7- and 30-day highlight rows; memory use is bounded by
/// that window and the display rank count, never by the sequence length.
pub struct TimelineSpecGenerator {
    timeline: Timeline,
    top_n: usize,
    overall_max: f64,
    total: u64,
    intro_frames: u64,
    produced: u64,
    /// Last emitted position per currently ranked entity.
    prev_positions: HashMap<String, f64>,
    window: VecDeque<StepDelta>,
    /// Next step index to fold into the rolling window.
    window_step: usize,
}

struct StepDelta {
    timestamp: DateTime<Utc>,
    deltas: BTreeMap<String, f64>,
}

impl TimelineSpecGenerator {
    /// Validates the timeline and precomputes run-constant scaling.
    ///
    /// An internally inconsistent timeline is a fatal construction error;
    /// nothing downstream ever sees a spec derived from bad source data.
    pub fn new(timeline: Timeline, top_n: usize) -> FrameforgeResult<Self> {
        timeline.validate()?;
        if top_n == 0 {
            return Err(FrameforgeError::generator("top_n must be >= 1"));
        }

        // Values are cumulative, so the global maximum lives in the last step.
        let last = timeline
            .steps
            .last()
            .ok_or_else(|| FrameforgeError::generator("timeline has no steps"))?;
        let overall_max = last
            .values
            .values()
            .copied()
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let total = timeline.total_frames();
        let intro_frames = timeline
            .intro
            .as_ref()
            .map(|i| i.hold_frames as u64)
            .unwrap_or(0);

        Ok(Self {
            timeline,
            top_n,
            overall_max,
            total,
            intro_frames,
            produced: 0,
            prev_positions: HashMap::new(),
            window: VecDeque::new(),
            window_step: 0,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn card_spec(&self, frame: u64) -> FrameforgeResult<TaskSpec> {
        let intro = self
            .timeline
            .intro
            .as_ref()
            .ok_or_else(|| FrameforgeError::generator("card frame without intro (bug)"))?;
        let timestamp = self
            .timeline
            .steps
            .first()
            .map(|s| s.timestamp)
            .ok_or_else(|| FrameforgeError::generator("timeline has no steps"))?;
        Ok(TaskSpec {
            index: FrameIndex(frame),
            timestamp,
            payload: FramePayload::Card(TitleCard {
                title: intro.title.clone(),
                subtitle: intro.subtitle.clone(),
                progress: (frame + 1) as f64 / intro.hold_frames as f64,
            }),
        })
    }

    fn chart_spec(&mut self, frame: u64, chart_frame: u64) -> FrameforgeResult<TaskSpec> {
        let steps = &self.timeline.steps;
        let fps = self.timeline.frames_per_step as u64;

        let (seg, t) = if steps.len() == 1 {
            (0, 1.0)
        } else {
            let last_seg = steps.len() - 2;
            let seg = ((chart_frame / fps) as usize).min(last_seg);
            let within = chart_frame - seg as u64 * fps;
            (seg, (within as f64 / fps as f64).min(1.0))
        };
        let ease = smoothstep(t);

        let (timestamp, values) = if steps.len() == 1 {
            (steps[0].timestamp, steps[0].values.clone())
        } else {
            let a = &steps[seg];
            let b = &steps[seg + 1];
            let ts = lerp_timestamp(a.timestamp, b.timestamp, ease);
            let mut values = BTreeMap::new();
            for id in a.values.keys().chain(b.values.keys()) {
                let va = a.values.get(id).copied().unwrap_or(0.0);
                let vb = b.values.get(id).copied().unwrap_or(0.0);
                values.insert(id.clone(), va + (vb - va) * ease);
            }
            (ts, values)
        };

        self.advance_window(timestamp)?;

        // Rank by interpolated value, ties broken by id for determinism.
        let mut ranked: Vec<(&String, f64)> = values
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(id, v)| (id, *v))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(self.top_n);

        let defs: HashMap<&str, &crate::timeline::EntityDef> = self
            .timeline
            .entities
            .iter()
            .map(|e| (e.id.as_str(), e))
            .collect();

        let enter_from = self.top_n as f64;
        let mut bars = Vec::with_capacity(ranked.len());
        let mut next_positions = HashMap::with_capacity(ranked.len());
        for (rank, (id, value)) in ranked.iter().enumerate() {
            let def = defs.get(id.as_str()).ok_or_else(|| {
                FrameforgeError::generator(format!("ranked unknown entity '{id}' (bug)"))
            })?;
            let target = rank as f64;
            let (start, is_new) = match self.prev_positions.get(id.as_str()) {
                Some(p) => (*p, false),
                None => (enter_from, true),
            };
            let position = start + (target - start) * POSITION_SMOOTHING;
            next_positions.insert((*id).clone(), position);
            bars.push(BarRow {
                entity: (*id).clone(),
                label: def.label.clone(),
                value: *value,
                position,
                color: def.color,
                art: def.art.clone(),
                is_new,
            });
        }
        // Entities that fell out of the ranking re-enter from the bottom later.
        self.prev_positions = next_positions;

        let highlights = self.highlights(timestamp, &defs);

        let spec = TaskSpec {
            index: FrameIndex(frame),
            timestamp,
            payload: FramePayload::Chart(ChartFrame {
                bars,
                highlights,
                timestamp_label: timestamp.format("%Y-%m-%d").to_string(),
                max_value: self.overall_max,
            }),
        };
        // The generator contract forbids emitting an invalid spec.
        spec.validate()
            .map_err(|e| FrameforgeError::generator(format!("emitted invalid spec: {e}")))?;
        Ok(spec)
    }

    /// Fold step increments into the rolling window up to `now` and drop
    /// entries older than the long window.
    ///
    /// Any ordering violation here means the rolling state is corrupt; that is
    /// a fatal generator error, never silently recovered.
    fn advance_window(&mut self, now: DateTime<Utc>) -> FrameforgeResult<()> {
        while self.window_step < self.timeline.steps.len()
            && self.timeline.steps[self.window_step].timestamp <= now
        {
            let step = &self.timeline.steps[self.window_step];
            if let Some(back) = self.window.back()
                && step.timestamp < back.timestamp
            {
                return Err(FrameforgeError::generator(
                    "rolling window out of order (corrupt generator state)",
                ));
            }

            let mut deltas = BTreeMap::new();
            for (id, value) in &step.values {
                let prev = if self.window_step == 0 {
                    0.0
                } else {
                    self.timeline.steps[self.window_step - 1]
                        .values
                        .get(id)
                        .copied()
                        .unwrap_or(0.0)
                };
                let delta = value - prev;
                if delta < -1e-9 {
                    return Err(FrameforgeError::generator(format!(
                        "rolling window underflow for '{id}' (cumulative value decreased)"
                    )));
                }
                if delta > 0.0 {
                    deltas.insert(id.clone(), delta);
                }
            }
            self.window.push_back(StepDelta {
                timestamp: step.timestamp,
                deltas,
            });
            self.window_step += 1;
        }

        let cutoff = now - Duration::days(LONG_WINDOW_DAYS);
        while let Some(front) = self.window.front() {
            if front.timestamp < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    fn highlights(
        &self,
        now: DateTime<Utc>,
        defs: &HashMap<&str, &crate::timeline::EntityDef>,
    ) -> Vec<Highlight> {
        let mut out = Vec::with_capacity(2);
        for days in [SHORT_WINDOW_DAYS, LONG_WINDOW_DAYS] {
            let cutoff = now - Duration::days(days);
            let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
            for entry in &self.window {
                if entry.timestamp < cutoff {
                    continue;
                }
                for (id, delta) in &entry.deltas {
                    *sums.entry(id.as_str()).or_insert(0.0) += delta;
                }
            }
            let top = sums.iter().max_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.cmp(a.0))
            });
            if let Some((id, value)) = top
                && *value > 0.0
                && let Some(def) = defs.get(id)
            {
                out.push(Highlight {
                    window_days: days as u32,
                    entity: (*id).to_string(),
                    label: def.label.clone(),
                    value: *value,
                });
            }
        }
        out
    }
}

impl SpecSource for TimelineSpecGenerator {
    fn next_spec(&mut self) -> FrameforgeResult<Option<TaskSpec>> {
        if self.produced >= self.total {
            return Ok(None);
        }
        let frame = self.produced;
        let spec = if frame < self.intro_frames {
            self.card_spec(frame)?
        } else {
            self.chart_spec(frame, frame - self.intro_frames)?
        };
        self.produced += 1;
        Ok(Some(spec))
    }

    fn reset(&mut self) {
        self.produced = 0;
        self.prev_positions.clear();
        self.window.clear();
        self.window_step = 0;
    }

    fn progress(&self) -> (u64, u64) {
        (self.produced, self.total)
    }
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp_timestamp(a: DateTime<Utc>, b: DateTime<Utc>, t: f64) -> DateTime<Utc> {
    let span = (b - a).num_milliseconds() as f64;
    a + Duration::milliseconds((span * t) as i64)
}
