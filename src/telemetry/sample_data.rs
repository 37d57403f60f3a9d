//! Random-walk sample data for simulated sensors

use rand::{Rng, RngCore};
use thiserror::Error;

/// Largest change per tick, as a fraction of the non-peak range
const MAX_FRACTION_TO_CHANGE_PER_TICK: f64 = 0.10;

/// Source of uniform doubles in `[0, 1)`
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

impl<R: RngCore + Send> RandomSource for R {
    fn next_f64(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleDataError {
    #[error("max non-peak value {max} must be greater than min value {min}")]
    EmptyRange { min: f64, max: f64 },

    #[error("min peak value {peak} must be greater than max non-peak value {max}")]
    PeakInsideRange { max: f64, peak: f64 },

    #[error("peak interval cannot be 0")]
    ZeroPeakInterval,
}

/// Bounded random walk with optional periodic peaks
pub struct SampleDataGenerator {
    min_value: f64,
    max_non_peak_value: f64,
    generate_peaks: bool,
    peak_interval: u64,
    start_value: f64,
    next_value: f64,
    delta: f64,
    threshold_width: f64,
    tick: u64,
    random: Box<dyn RandomSource>,
}

impl SampleDataGenerator {
    /// A generator that spikes above `min_peak_value` every `peak_interval` ticks.
    /// A `min_peak_value` of 0 disables peaks.
    pub fn with_peaks(
        min_value: f64,
        max_non_peak_value: f64,
        min_peak_value: f64,
        peak_interval: u64,
        random: Box<dyn RandomSource>,
    ) -> Result<Self, SampleDataError> {
        if min_value >= max_non_peak_value {
            return Err(SampleDataError::EmptyRange {
                min: min_value,
                max: max_non_peak_value,
            });
        }
        if min_peak_value != 0.0 && max_non_peak_value >= min_peak_value {
            return Err(SampleDataError::PeakInsideRange {
                max: max_non_peak_value,
                peak: min_peak_value,
            });
        }
        let generate_peaks = min_peak_value != 0.0;
        if generate_peaks && peak_interval == 0 {
            return Err(SampleDataError::ZeroPeakInterval);
        }

        // scaled so a peak always exceeds the threshold rather than touching it
        let min_peak_value = min_peak_value * 1.01;
        let start_value = (max_non_peak_value - min_value) / 2.0 + min_value;

        Ok(Self {
            min_value,
            max_non_peak_value,
            generate_peaks,
            peak_interval,
            start_value,
            next_value: start_value,
            delta: (max_non_peak_value - min_value) * MAX_FRACTION_TO_CHANGE_PER_TICK,
            threshold_width: min_peak_value - min_value,
            tick: 1,
            random,
        })
    }

    /// A generator without peaks
    pub fn new(
        min_value: f64,
        max_non_peak_value: f64,
        random: Box<dyn RandomSource>,
    ) -> Result<Self, SampleDataError> {
        Self::with_peaks(min_value, max_non_peak_value, 0.0, 0, random)
    }

    pub fn next_value(&mut self) -> f64 {
        self.step();
        let peak = self.generate_peaks && self.tick % self.peak_interval == 0;
        self.tick += 1;
        if peak {
            self.next_value + self.threshold_width
        } else {
            self.next_value
        }
    }

    /// Re-centre the range, and any peaks, on a new mid-point
    pub fn shift_subsequent_data(&mut self, new_mid_point: f64) {
        let half_width = self.start_value - self.min_value;
        self.next_value = new_mid_point;
        self.start_value = new_mid_point;
        self.min_value = new_mid_point - half_width;
        self.max_non_peak_value = new_mid_point + half_width;
    }

    pub fn mid_point(&self) -> f64 {
        (self.min_value + self.max_non_peak_value) / 2.0
    }

    fn step(&mut self) {
        let adjustment = 2.0 * self.delta * self.random.next_f64() - self.delta;
        self.next_value += adjustment;
        if self.next_value < self.min_value || self.next_value > self.max_non_peak_value {
            self.next_value -= adjustment;
            if self.next_value < self.min_value || self.next_value > self.max_non_peak_value {
                self.next_value = self.start_value;
            }
        }
    }
}
