//! Signal Detector. Runs on each finalized Spectrum Frame when enabled;
//! smooths in linear power, finds contiguous above-threshold runs, and
//! associates them with tracked signals by nearest center frequency.

use std::collections::HashSet;

use spectra_core::{DetectorConfig, SpectrumFrame, TrackedSignal};

const SMOOTHING_WINDOW: usize = 3;
const POWER_EPSILON: f32 = 1e-20;

#[derive(Debug, Clone)]
pub enum SignalEvent {
    New(TrackedSignal),
    Update(TrackedSignal),
    Lost(TrackedSignal),
}

struct Run {
    start: usize,
    end: usize,
    peak_bin: usize,
    peak_linear: f32,
}

pub struct SignalDetector {
    config: DetectorConfig,
    tracked: Vec<TrackedSignal>,
    next_id: u64,
}

impl SignalDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            tracked: Vec::new(),
            next_id: 1,
        }
    }

    pub fn set_config(&mut self, config: DetectorConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn tracked_signals(&self) -> &[TrackedSignal] {
        &self.tracked
    }

    pub fn process_frame(&mut self, frame: &SpectrumFrame, now: f64) -> Vec<SignalEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let linear: Vec<f32> = frame.bins.iter().map(|&d| db_to_linear(d)).collect();
        let smoothed = moving_average(&linear, SMOOTHING_WINDOW);
        let noise_floor_linear = db_to_linear(frame.noise_floor);
        let threshold_linear = noise_floor_linear * 10f32.powf(self.config.threshold_db / 10.0);
        let runs = find_runs(&smoothed, threshold_linear);

        let num_bins = frame.bins.len().max(1);
        let bin_width_hz = frame.sample_rate / num_bins as f64;

        let mut matched_ids: HashSet<u64> = HashSet::new();
        let mut events = Vec::new();

        for run in runs {
            let center_bin = (run.start + run.end - 1) as f64 / 2.0;
            let center_freq = frame.center_freq - frame.sample_rate / 2.0 + center_bin * bin_width_hz;
            let bandwidth = (run.end - run.start) as f64 * bin_width_hz;
            let freq_tol = self.config.freq_tol_hz.unwrap_or(0.5 * bandwidth).max(bin_width_hz);

            let mut best: Option<(usize, f64)> = None;
            for (idx, s) in self.tracked.iter().enumerate() {
                if matched_ids.contains(&s.signal_id) {
                    continue;
                }
                let d = (s.center_freq - center_freq).abs();
                if d <= freq_tol && best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((idx, d));
                }
            }

            if let Some((idx, _)) = best {
                let existing = &mut self.tracked[idx];
                existing.center_freq = center_freq;
                existing.bandwidth = bandwidth;
                existing.peak_power = linear_to_db(run.peak_linear);
                existing.last_seen = now;
                existing.hit_count += 1;
                existing.miss_count = 0;
                matched_ids.insert(existing.signal_id);
                events.push(SignalEvent::Update(existing.clone()));
            } else {
                let signal_id = self.next_id;
                self.next_id += 1;
                let signal = TrackedSignal {
                    signal_id,
                    center_freq,
                    bandwidth,
                    peak_power: linear_to_db(run.peak_linear),
                    first_seen: now,
                    last_seen: now,
                    hit_count: 1,
                    miss_count: 0,
                    classification: None,
                };
                matched_ids.insert(signal_id);
                self.tracked.push(signal.clone());
                events.push(SignalEvent::New(signal));
            }
            let _ = run.peak_bin;
        }

        let miss_limit = self.config.miss_count_limit;
        let mut lost = Vec::new();
        self.tracked.retain_mut(|s| {
            if matched_ids.contains(&s.signal_id) {
                return true;
            }
            s.miss_count += 1;
            if s.miss_count >= miss_limit {
                lost.push(s.clone());
                false
            } else {
                true
            }
        });
        for signal in lost {
            events.push(SignalEvent::Lost(signal));
        }

        events
    }
}

fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let radius = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            values[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

fn find_runs(values: &[f32], threshold: f32) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &v) in values.iter().enumerate() {
        if v > threshold {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            runs.push(make_run(values, s, i));
        }
    }
    if let Some(s) = start {
        runs.push(make_run(values, s, values.len()));
    }
    runs
}

fn make_run(values: &[f32], start: usize, end: usize) -> Run {
    let mut peak_bin = start;
    let mut peak_linear = values[start];
    for i in start..end {
        if values[i] > peak_linear {
            peak_linear = values[i];
            peak_bin = i;
        }
    }
    Run {
        start,
        end,
        peak_bin,
        peak_linear,
    }
}

fn db_to_linear(dbfs: f32) -> f32 {
    10f32.powf(dbfs / 10.0)
}

fn linear_to_db(linear: f32) -> f32 {
    10.0 * linear.max(POWER_EPSILON).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(bins: Vec<f32>, noise_floor: f32) -> SpectrumFrame {
        SpectrumFrame {
            bins,
            peak_hold: None,
            timestamp: 0.0,
            center_freq: 100e6,
            sample_rate: 2e6,
            bandwidth: 2e6,
            gain: 0.0,
            fft_size: 1024,
            noise_floor,
            peak_bin: 0,
            peak_power: 0.0,
        }
    }

    #[test]
    fn detector_lifecycle_new_update_lost() {
        let config = DetectorConfig {
            enabled: true,
            threshold_db: 10.0,
            miss_count_limit: 3,
            freq_tol_hz: Some(50_000.0),
        };
        let mut detector = SignalDetector::new(config);

        let mut loud = vec![-90.0_f32; 64];
        loud[32] = -70.0;
        let silent = vec![-90.0_f32; 64];

        let mut new_events = 0;
        let mut update_events = 0;
        let mut lost_events = 0;

        for frame_idx in 0..10 {
            let evs = detector.process_frame(&make_frame(loud.clone(), -90.0), frame_idx as f64);
            for e in evs {
                match e {
                    SignalEvent::New(_) => new_events += 1,
                    SignalEvent::Update(_) => update_events += 1,
                    SignalEvent::Lost(_) => lost_events += 1,
                }
            }
        }
        for frame_idx in 10..18 {
            let evs = detector.process_frame(&make_frame(silent.clone(), -90.0), frame_idx as f64);
            for e in evs {
                if let SignalEvent::Lost(_) = e {
                    lost_events += 1;
                }
            }
        }

        assert_eq!(new_events, 1);
        assert_eq!(update_events, 9);
        assert_eq!(lost_events, 1);
    }
}
