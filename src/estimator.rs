// PulseWatch — Heart-rate / SpO2 estimator
//
// Batch-fed peak detector on the IR channel:
//   presence gate → per-batch DC removal into a 128-entry ring →
//   local-maximum scan → peak-interval history → BPM.
// SpO2 comes from the red/IR AC-DC ratio of the same batch.
//
// Every sample carries an absolute index (the sample clock), so peak
// intervals stay correct across batches and ring wraparound.

use crate::config::*;
use crate::drivers::max30102::Sample;

/// Tunable algorithm parameters. `Default` reproduces the reference behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub sample_rate_hz: u32,
    /// Finger present only if the IR batch average exceeds this...
    pub presence_min_ir_avg: i64,
    /// ...and the IR swing exceeds this fraction of the average.
    pub presence_min_swing_ratio: f32,
    /// Without a finger, SpO2 is still computed above this on both channels.
    pub spo2_min_channel_avg: i64,
    pub peak_threshold_floor: i32,
    pub peak_threshold_divisor: i32,
    pub min_peak_interval: u32,
    pub max_peak_interval: u32,
    pub min_accepted_peaks: u32,
    /// Empirical correction applied to the raw BPM. The default of 2 stays
    /// even though the scan visits every sample once and never counts a
    /// peak twice; reported rates are calibrated against the halved value.
    pub bpm_correction_divisor: f32,
    pub hr_valid_min: i32,
    pub hr_valid_max: i32,
    pub spo2_intercept: f32,
    pub spo2_slope: f32,
    pub spo2_valid_min: i32,
    pub spo2_valid_max: i32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            presence_min_ir_avg: PRESENCE_MIN_IR_AVG,
            presence_min_swing_ratio: PRESENCE_MIN_SWING_RATIO,
            spo2_min_channel_avg: SPO2_MIN_CHANNEL_AVG,
            peak_threshold_floor: PEAK_THRESHOLD_FLOOR,
            peak_threshold_divisor: PEAK_THRESHOLD_DIVISOR,
            min_peak_interval: MIN_PEAK_INTERVAL,
            max_peak_interval: MAX_PEAK_INTERVAL,
            min_accepted_peaks: MIN_ACCEPTED_PEAKS,
            bpm_correction_divisor: BPM_CORRECTION_DIVISOR,
            hr_valid_min: HR_VALID_MIN,
            hr_valid_max: HR_VALID_MAX,
            spo2_intercept: SPO2_INTERCEPT,
            spo2_slope: SPO2_SLOPE,
            spo2_valid_min: SPO2_VALID_MIN,
            spo2_valid_max: SPO2_VALID_MAX,
        }
    }
}

impl EstimatorConfig {
    /// Defaults, timed for samples arriving at `sample_rate_hz`.
    pub fn with_sample_rate(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartRateResult {
    pub heart_rate: i32,
    pub hr_valid: bool,
    pub spo2: i32,
    pub spo2_valid: bool,
    pub finger_detected: bool,
}

/// What happened to a detected peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakOutcome {
    /// First peak of a segment; only sets the anchor.
    Anchored,
    /// Interval in range; stored in the history.
    Accepted(u32),
    /// Too soon after the anchor; the anchor is kept.
    Ignored,
    /// Too long since the anchor; the anchor moves here.
    Discarded,
}

#[derive(Debug, Clone, Copy)]
struct ChannelStats {
    min: i64,
    max: i64,
    avg: i64,
}

impl ChannelStats {
    fn of(values: impl Iterator<Item = u32>) -> Self {
        let (mut min, mut max, mut sum, mut n) = (i64::MAX, i64::MIN, 0i64, 0i64);
        for v in values {
            let v = v as i64;
            min = min.min(v);
            max = max.max(v);
            sum += v;
            n += 1;
        }
        if n == 0 {
            return Self { min: 0, max: 0, avg: 0 };
        }
        Self { min, max, avg: sum / n }
    }

    fn swing(&self) -> i64 {
        self.max - self.min
    }
}

pub struct HeartRateEstimator {
    config: EstimatorConfig,
    ring: [i32; DC_RING_SIZE],
    /// Absolute index of the next sample to arrive.
    clock: u64,
    /// First index of the current uninterrupted run of finger-present samples.
    segment_start: u64,
    /// Next index to examine as a peak candidate.
    next_candidate: u64,
    last_peak: Option<u64>,
    intervals: [u32; INTERVAL_HISTORY],
    interval_cursor: usize,
    accepted_peaks: u32,
}

impl HeartRateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            ring: [0; DC_RING_SIZE],
            clock: 0,
            segment_start: 0,
            next_candidate: 0,
            last_peak: None,
            intervals: [0; INTERVAL_HISTORY],
            interval_cursor: 0,
            accepted_peaks: 0,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Forget everything: ring, sample clock, anchor and interval history.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    pub fn samples_seen(&self) -> u64 {
        self.clock
    }

    pub fn accepted_peaks(&self) -> u32 {
        self.accepted_peaks
    }

    pub fn intervals(&self) -> &[u32] {
        &self.intervals
    }

    pub fn last_peak(&self) -> Option<u64> {
        self.last_peak
    }

    /// Feed one batch and compute a fresh result. Never fails.
    pub fn process(&mut self, batch: &[Sample]) -> HeartRateResult {
        if batch.is_empty() {
            return HeartRateResult::default();
        }

        let ir = ChannelStats::of(batch.iter().map(|s| s.ir));
        let red = ChannelStats::of(batch.iter().map(|s| s.red));
        let cfg = self.config;

        let present = ir.avg > cfg.presence_min_ir_avg
            && ir.swing() as f32 > cfg.presence_min_swing_ratio * ir.avg as f32;

        let mut result = HeartRateResult {
            finger_detected: present,
            ..HeartRateResult::default()
        };

        if present {
            self.ingest(batch, &ir);
            let (bpm, valid) = self.heart_rate();
            result.heart_rate = bpm;
            result.hr_valid = valid;
        } else {
            self.break_segment(batch.len());
        }

        let both_lit = ir.avg > cfg.spo2_min_channel_avg && red.avg > cfg.spo2_min_channel_avg;
        if present || both_lit {
            let (spo2, valid) = self.spo2(&red, &ir);
            result.spo2 = spo2;
            result.spo2_valid = valid;
        }

        log::debug!(
            "estimator: ir avg={} swing={} finger={} peaks={} -> {:?}",
            ir.avg,
            ir.swing(),
            present,
            self.accepted_peaks,
            result
        );
        result
    }

    fn ingest(&mut self, batch: &[Sample], ir: &ChannelStats) {
        for sample in batch {
            let slot = (self.clock % DC_RING_SIZE as u64) as usize;
            self.ring[slot] = (sample.ir as i64 - ir.avg) as i32;
            self.clock += 1;
        }

        let cfg = self.config;
        let threshold = cfg
            .peak_threshold_floor
            .max((ir.swing() / cfg.peak_threshold_divisor.max(1) as i64) as i32);

        // A candidate needs both neighbours inside the segment, and must lie
        // within the scan window.
        let first = self
            .next_candidate
            .max(self.segment_start + 1)
            .max(self.clock.saturating_sub(PEAK_SCAN_WINDOW as u64));
        let last = self.clock - 1; // exclusive: needs a right neighbour

        for index in first..last {
            let value = self.at(index);
            if value > threshold && value > self.at(index - 1) && value > self.at(index + 1) {
                self.record_peak(index);
            }
        }
        self.next_candidate = self.next_candidate.max(last);
    }

    fn break_segment(&mut self, len: usize) {
        self.clock += len as u64;
        self.segment_start = self.clock;
        self.next_candidate = self.clock;
        self.last_peak = None;
    }

    fn at(&self, index: u64) -> i32 {
        self.ring[(index % DC_RING_SIZE as u64) as usize]
    }

    /// Apply the interval rules to a peak found at absolute sample `index`.
    pub fn record_peak(&mut self, index: u64) -> PeakOutcome {
        let Some(previous) = self.last_peak else {
            self.last_peak = Some(index);
            return PeakOutcome::Anchored;
        };

        let interval = index.saturating_sub(previous);
        if interval < self.config.min_peak_interval as u64 {
            return PeakOutcome::Ignored;
        }
        self.last_peak = Some(index);
        if interval > self.config.max_peak_interval as u64 {
            return PeakOutcome::Discarded;
        }

        let interval = interval as u32;
        self.intervals[self.interval_cursor] = interval;
        self.interval_cursor = (self.interval_cursor + 1) % INTERVAL_HISTORY;
        self.accepted_peaks = self.accepted_peaks.saturating_add(1);
        PeakOutcome::Accepted(interval)
    }

    /// BPM from the interval history, with its validity flag.
    pub fn heart_rate(&self) -> (i32, bool) {
        let cfg = &self.config;
        if self.accepted_peaks < cfg.min_accepted_peaks {
            return (0, false);
        }
        let (sum, count) = self
            .intervals
            .iter()
            .filter(|&&i| i != 0)
            .fold((0u32, 0u32), |(s, n), &i| (s + i, n + 1));
        if count == 0 {
            return (0, false);
        }

        let average = sum as f32 / count as f32;
        let raw_bpm = (60 * cfg.sample_rate_hz) as f32 / average;
        let bpm = (raw_bpm / cfg.bpm_correction_divisor) as i32;
        (bpm, (cfg.hr_valid_min..=cfg.hr_valid_max).contains(&bpm))
    }

    fn spo2(&self, red: &ChannelStats, ir: &ChannelStats) -> (i32, bool) {
        let (red_ac, ir_ac) = (red.swing(), ir.swing());
        if red_ac == 0 || ir_ac == 0 || red.avg == 0 || ir.avg == 0 {
            return (0, false);
        }
        let ratio = (red_ac as f32 * ir.avg as f32) / (ir_ac as f32 * red.avg as f32);
        self.spo2_from_ratio(ratio)
    }

    /// Linear SpO2 model, clamped to 0..=100.
    pub fn spo2_from_ratio(&self, ratio: f32) -> (i32, bool) {
        let cfg = &self.config;
        let raw = cfg.spo2_intercept - cfg.spo2_slope * ratio;
        let spo2 = raw.clamp(0.0, 100.0) as i32;
        (spo2, (cfg.spo2_valid_min..=cfg.spo2_valid_max).contains(&spo2))
    }
}

impl Default for HeartRateEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}
