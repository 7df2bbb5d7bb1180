//! Parameter automation
//!
//! `Automation` is a timeline of scheduled values evaluated against the audio
//! clock: callers name times and targets, and the renderer asks for the value
//! at each frame. `Smoothed` chases a target with a one-pole time constant and
//! is used for continuously modulated parameters.

/// How an event reaches its value
#[derive(Debug, Clone, Copy, PartialEq)]
enum RampKind {
    /// Jump at the event time
    Set,
    /// Straight line from the previous event
    Linear,
    /// Constant-ratio curve from the previous event
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct AutomationEvent {
    time: f64,
    value: f64,
    kind: RampKind,
}

/// Timeline of scheduled parameter changes
#[derive(Debug, Clone)]
pub struct Automation {
    initial: f64,
    events: Vec<AutomationEvent>,
}

impl Automation {
    /// Create a timeline holding `initial` until the first event
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    fn insert(&mut self, event: AutomationEvent) {
        // Equal times keep call order
        let pos = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(pos, event);
    }

    /// Jump to `value` at `time`
    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent {
            time,
            value,
            kind: RampKind::Set,
        });
    }

    /// Ramp linearly from the previous event to `value`, arriving at `time`
    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent {
            time,
            value,
            kind: RampKind::Linear,
        });
    }

    /// Ramp exponentially from the previous event to `value`, arriving at `time`
    ///
    /// Endpoints of opposite sign or zero cannot be bridged; the previous value
    /// is held until `time` instead.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent {
            time,
            value,
            kind: RampKind::Exponential,
        });
    }

    /// Remove every event scheduled at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time < time);
    }

    /// Evaluate the timeline
    pub fn value_at(&self, time: f64) -> f64 {
        let mut anchor: Option<(f64, f64)> = None;
        let mut value = self.initial;

        for event in &self.events {
            if event.time <= time {
                anchor = Some((event.time, event.value));
                value = event.value;
                continue;
            }

            return match (event.kind, anchor) {
                (RampKind::Linear, Some((t0, v0))) => {
                    let progress = (time - t0) / (event.time - t0);
                    v0 + (event.value - v0) * progress
                }
                (RampKind::Exponential, Some((t0, v0))) if v0 * event.value > 0.0 => {
                    let progress = (time - t0) / (event.time - t0);
                    v0 * (event.value / v0).powf(progress)
                }
                _ => value,
            };
        }

        value
    }

    /// Drop events fully in the past, keeping the one that anchors the next ramp
    pub fn prune(&mut self, time: f64) {
        let passed = self.events.partition_point(|e| e.time <= time);
        if passed > 1 {
            self.events.drain(..passed - 1);
        }
    }

    /// Time of the last scheduled event
    pub fn end_time(&self) -> Option<f64> {
        self.events.last().map(|e| e.time)
    }

    /// Number of events still on the timeline
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One-pole approach toward a target value
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    current: f64,
    target: f64,
    coeff: f64,
}

impl Smoothed {
    /// `time_constant` in seconds; reaches ~63% of a step after that long
    pub fn new(value: f64, time_constant: f64, sample_rate: f64) -> Self {
        let coeff = if time_constant > 0.0 {
            1.0 - (-1.0 / (time_constant * sample_rate)).exp()
        } else {
            1.0
        };

        Self {
            current: value,
            target: value,
            coeff,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Jump straight to `value`
    pub fn set_immediate(&mut self, value: f64) {
        self.current = value;
        self.target = value;
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Advance one sample and return the new value
    pub fn next(&mut self) -> f64 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coeff;
            if (self.target - self.current).abs() < 1e-9 {
                self.current = self.target;
            }
        }
        self.current
    }
}
