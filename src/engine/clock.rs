//! Control-rate scheduler
//!
//! Counts rendered frames and reports when the next control tick is due, so
//! LFO updates interleave with audio rendering at fixed frame positions.

/// Audio-time clock with a periodic control tick
#[derive(Debug, Clone)]
pub struct ControlClock {
    sample_rate: f64,
    frames: u64,
    interval: u64,
    next_tick: u64,
    last_tick: u64,
}

impl ControlClock {
    pub fn new(sample_rate: f64, control_rate: f64) -> Self {
        let interval = (sample_rate / control_rate.max(1.0)).round().max(1.0) as u64;
        Self {
            sample_rate,
            frames: 0,
            interval,
            next_tick: interval,
            last_tick: 0,
        }
    }

    /// Current audio time in seconds
    pub fn now(&self) -> f64 {
        self.frames as f64 / self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames between control ticks
    pub fn tick_interval(&self) -> u64 {
        self.interval
    }

    pub fn advance(&mut self, frames: u64) {
        self.frames += frames;
    }

    /// Returns the elapsed time since the previous tick if one is due
    pub fn poll_tick(&mut self) -> Option<f64> {
        if self.frames < self.next_tick {
            return None;
        }
        let dt = (self.frames - self.last_tick) as f64 / self.sample_rate;
        self.last_tick = self.frames;
        self.next_tick = self.frames + self.interval;
        Some(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_interval() {
        let clock = ControlClock::new(48000.0, 60.0);
        assert_eq!(clock.tick_interval(), 800);
    }

    #[test]
    fn test_ticks_at_interval() {
        let mut clock = ControlClock::new(1000.0, 10.0);
        let mut ticks = Vec::new();
        for _ in 0..350 {
            if let Some(dt) = clock.poll_tick() {
                ticks.push((clock.frames(), dt));
            }
            clock.advance(1);
        }
        assert_eq!(ticks, vec![(100, 0.1), (200, 0.1), (300, 0.1)]);
        assert!((clock.now() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_late_poll_reports_elapsed_time() {
        let mut clock = ControlClock::new(1000.0, 10.0);
        clock.advance(250);
        assert_eq!(clock.poll_tick(), Some(0.25));
        assert_eq!(clock.poll_tick(), None);
        clock.advance(100);
        assert_eq!(clock.poll_tick(), Some(0.1));
    }
}
