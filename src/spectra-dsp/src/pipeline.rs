//! Per-frame DSP algorithm: DC removal → window → FFT →
//! magnitude-squared → averaging → peak-preserving downsample → dBFS →
//! peak hold → stats.
//!
//! All averaging happens in linear power; dB conversion happens exactly
//! once. `set_param` is atomic with `process_frame` via the internal
//! mutex.

use std::sync::Mutex;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use spectra_core::{AveragingMode, DspConfig, SampleBlock, SpectraResult, SpectrumFrame};

use crate::util::wall_clock_seconds;
use crate::window::WindowTable;

const DC_IIR_ALPHA: f32 = 0.001;
const POWER_EPSILON: f32 = 1e-20;

struct Accumulator {
    /// Running linear-power sum (for `Linear(N)`) or running EMA state
    /// (for `Exponential`). Indexed by pre-downsample FFT bin.
    power: Vec<f32>,
    frames_seen: u32,
}

struct Inner {
    config: DspConfig,
    fft: std::sync::Arc<dyn Fft<f32>>,
    window: WindowTable,
    dc_i: f32,
    dc_q: f32,
    overlap_carry: Vec<f32>,
    accumulator: Option<Accumulator>,
    peak_hold: Option<Vec<f32>>,
}

impl Inner {
    fn new(config: DspConfig) -> SpectraResult<Self> {
        config.validate()?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = WindowTable::generate(config.window_kind, config.fft_size);
        Ok(Self {
            config,
            fft,
            window,
            dc_i: 0.0,
            dc_q: 0.0,
            overlap_carry: Vec::new(),
            accumulator: None,
            peak_hold: None,
        })
    }

    fn reset_state(&mut self) {
        self.dc_i = 0.0;
        self.dc_q = 0.0;
        self.overlap_carry.clear();
        self.accumulator = None;
        self.peak_hold = None;
    }
}

/// Stateful FFT pipeline. One instance per logical spectrum stream (the
/// live pipeline and each sweep step use their own instance).
pub struct DspPipeline {
    inner: Mutex<Inner>,
}

impl DspPipeline {
    pub fn new(config: DspConfig) -> SpectraResult<Self> {
        Ok(Self {
            inner: Mutex::new(Inner::new(config)?),
        })
    }

    /// Replaces the configuration. Size- or window-changing reconfiguration
    /// discards peak hold and averaging state (`StateReset`).
    pub fn set_param(&self, config: DspConfig) -> SpectraResult<()> {
        config.validate()?;
        let mut inner = self.inner.lock().expect("dsp pipeline mutex poisoned");
        let size_changed =
            inner.config.fft_size != config.fft_size || inner.config.window_kind != config.window_kind;
        if size_changed {
            let mut planner = FftPlanner::<f32>::new();
            inner.fft = planner.plan_fft_forward(config.fft_size);
            inner.window = WindowTable::generate(config.window_kind, config.fft_size);
        }
        inner.config = config;
        inner.reset_state();
        Ok(())
    }

    pub fn reset_peak_hold(&self) {
        let mut inner = self.inner.lock().expect("dsp pipeline mutex poisoned");
        inner.peak_hold = None;
    }

    #[must_use]
    pub fn config(&self) -> DspConfig {
        self.inner.lock().expect("dsp pipeline mutex poisoned").config.clone()
    }

    /// Consumes samples from `block`, returning a finished frame once a
    /// full FFT-sized window is available. Blocks shorter than one frame
    /// (after accounting for overlap carry) return `None`.
    pub fn process_frame(&self, block: &SampleBlock, gain: f32) -> SpectraResult<Option<SpectrumFrame>> {
        let mut inner = self.inner.lock().expect("dsp pipeline mutex poisoned");
        let fft_size = inner.config.fft_size;

        let mut iq: Vec<f32> = std::mem::take(&mut inner.overlap_carry);
        iq.extend_from_slice(&block.samples);

        if iq.len() < fft_size * 2 {
            inner.overlap_carry = iq;
            return Ok(None);
        }

        let advance = if inner.config.overlap_fraction == 0.5 {
            fft_size
        } else {
            fft_size * 2
        };

        let mut frame_iq: Vec<f32> = iq[..fft_size * 2].to_vec();
        inner.overlap_carry = if advance < iq.len() {
            iq[advance..].to_vec()
        } else {
            Vec::new()
        };

        if inner.config.dc_removal {
            remove_dc(&mut frame_iq, &mut inner.dc_i, &mut inner.dc_q);
        }

        let mut spectrum: Vec<Complex32> = frame_iq
            .chunks_exact(2)
            .zip(inner.window.weights.iter())
            .map(|(pair, &w)| Complex32::new(pair[0] * w, pair[1] * w))
            .collect();

        inner.fft.process(&mut spectrum);
        fft_shift(&mut spectrum);

        let mut power: Vec<f32> = spectrum.iter().map(|c| c.norm_sqr()).collect();
        average_in_place(&mut inner.accumulator, &mut power, inner.config.averaging_mode);

        let output_bins = inner.config.output_bins_or_fft_size();
        let downsampled = downsample_peak_preserving(&power, output_bins);

        let window_power_gain = inner.window.power_gain;
        let n = fft_size as f32;
        let mut dbfs: Vec<f32> = downsampled
            .iter()
            .map(|&p| {
                let normalized = (n * n * window_power_gain as f32).max(POWER_EPSILON);
                10.0 * (p.max(POWER_EPSILON)).log10() - 10.0 * normalized.log10()
            })
            .collect();

        if inner.config.peak_hold {
            let held = inner.peak_hold.get_or_insert_with(|| dbfs.clone());
            if held.len() != dbfs.len() {
                *held = dbfs.clone();
            } else {
                for (h, &v) in held.iter_mut().zip(dbfs.iter()) {
                    *h = h.max(v);
                }
            }
        }
        let peak_hold_out = inner.peak_hold.clone();

        let (noise_floor, peak_bin, peak_power) = bin_stats(&mut dbfs);

        Ok(Some(SpectrumFrame {
            bins: dbfs,
            peak_hold: peak_hold_out,
            timestamp: wall_clock_seconds(),
            center_freq: block.center_freq,
            sample_rate: block.sample_rate,
            bandwidth: block.sample_rate,
            gain,
            fft_size: fft_size as u32,
            noise_floor,
            peak_bin,
            peak_power,
        }))
    }
}

fn remove_dc(frame_iq: &mut [f32], dc_i: &mut f32, dc_q: &mut f32) {
    for pair in frame_iq.chunks_exact_mut(2) {
        *dc_i += DC_IIR_ALPHA * (pair[0] - *dc_i);
        *dc_q += DC_IIR_ALPHA * (pair[1] - *dc_q);
        pair[0] -= *dc_i;
        pair[1] -= *dc_q;
    }
}

fn fft_shift(spectrum: &mut [Complex32]) {
    let half = spectrum.len() / 2;
    spectrum.rotate_left(half);
}

fn average_in_place(acc: &mut Option<Accumulator>, power: &mut [f32], mode: AveragingMode) {
    match mode {
        AveragingMode::None => {}
        AveragingMode::Linear(target_n) => {
            let state = acc.get_or_insert_with(|| Accumulator {
                power: vec![0.0; power.len()],
                frames_seen: 0,
            });
            if state.power.len() != power.len() {
                *state = Accumulator {
                    power: vec![0.0; power.len()],
                    frames_seen: 0,
                };
            }
            for (s, &p) in state.power.iter_mut().zip(power.iter()) {
                *s += p;
            }
            state.frames_seen += 1;
            if state.frames_seen >= target_n {
                let n = state.frames_seen as f32;
                for (p, s) in power.iter_mut().zip(state.power.iter()) {
                    *p = *s / n;
                }
                state.power.iter_mut().for_each(|s| *s = 0.0);
                state.frames_seen = 0;
            } else {
                let n = state.frames_seen as f32;
                for (p, s) in power.iter_mut().zip(state.power.iter()) {
                    *p = *s / n;
                }
            }
        }
        AveragingMode::Exponential(alpha) => {
            let state = acc.get_or_insert_with(|| Accumulator {
                power: power.to_vec(),
                frames_seen: 1,
            });
            if state.power.len() != power.len() {
                *state = Accumulator {
                    power: power.to_vec(),
                    frames_seen: 1,
                };
            } else {
                for (s, &p) in state.power.iter_mut().zip(power.iter()) {
                    *s = alpha * p + (1.0 - alpha) * *s;
                }
                state.frames_seen += 1;
            }
            power.copy_from_slice(&state.power);
        }
    }
}

/// For each output bin, takes the maximum over the group of input bins it
/// spans so narrowband signals survive downsampling.
fn downsample_peak_preserving(power: &[f32], output_bins: usize) -> Vec<f32> {
    let fft_size = power.len();
    if output_bins >= fft_size {
        return power.to_vec();
    }
    (0..output_bins)
        .map(|j| {
            let lo = (j * fft_size) / output_bins;
            let hi = (((j + 1) * fft_size) / output_bins).max(lo + 1).min(fft_size);
            power[lo..hi].iter().cloned().fold(f32::MIN, f32::max)
        })
        .collect()
}

/// Returns `(noise_floor, peak_bin, peak_power)`. The percentile pick is
/// done by sorted rank, which is invariant under the monotonic dB
/// transform, so it is safe to compute on the already-converted bins.
fn bin_stats(bins: &[f32]) -> (f32, usize, f32) {
    let mut peak_bin = 0;
    let mut peak_power = f32::MIN;
    for (i, &v) in bins.iter().enumerate() {
        if v > peak_power {
            peak_power = v;
            peak_bin = i;
        }
    }
    let mut sorted = bins.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f32) * 0.25) as usize;
    let noise_floor = sorted.get(idx.min(sorted.len().saturating_sub(1))).copied().unwrap_or(0.0);
    (noise_floor, peak_bin, peak_power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectra_core::WindowKind;

    fn make_block(num_samples: usize, seq: u64) -> SampleBlock {
        SampleBlock {
            samples: vec![0.1; num_samples * 2],
            center_freq: 100e6,
            sample_rate: 2e6,
            seq,
        }
    }

    #[test]
    fn accumulates_until_full_frame() {
        let cfg = DspConfig {
            fft_size: 256,
            window_kind: WindowKind::Hanning,
            overlap_fraction: 0.0,
            averaging_mode: AveragingMode::None,
            dc_removal: false,
            peak_hold: false,
            output_bins: None,
        };
        let pipeline = DspPipeline::new(cfg).unwrap();
        let partial = make_block(100, 0);
        assert!(pipeline.process_frame(&partial, 0.0).unwrap().is_none());
        let rest = make_block(156, 1);
        let frame = pipeline.process_frame(&rest, 0.0).unwrap().unwrap();
        assert_eq!(frame.num_bins(), 256);
    }

    #[test]
    fn dbfs_values_are_finite() {
        let cfg = DspConfig {
            fft_size: 256,
            window_kind: WindowKind::Rectangular,
            overlap_fraction: 0.0,
            averaging_mode: AveragingMode::None,
            dc_removal: false,
            peak_hold: false,
            output_bins: None,
        };
        let pipeline = DspPipeline::new(cfg).unwrap();
        let block = make_block(256, 0);
        let frame = pipeline.process_frame(&block, 0.0).unwrap().unwrap();
        assert!(frame.bins.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn state_reset_clears_peak_hold() {
        let mut cfg = DspConfig::default();
        cfg.fft_size = 256;
        cfg.peak_hold = true;
        let pipeline = DspPipeline::new(cfg.clone()).unwrap();
        let block = make_block(256, 0);
        pipeline.process_frame(&block, 0.0).unwrap();
        cfg.fft_size = 512;
        pipeline.set_param(cfg).unwrap();
        assert!(pipeline
            .inner
            .lock()
            .unwrap()
            .peak_hold
            .is_none());
    }

    #[test]
    fn peak_preserving_downsample_keeps_narrow_peak() {
        let mut power = vec![0.0_f32; 1024];
        power[513] = 100.0;
        let down = downsample_peak_preserving(&power, 64);
        assert!(down.iter().any(|&v| v == 100.0));
    }

    #[test]
    fn sawtooth_power_matches_dbfs_formula_and_stats() {
        let num_bins = 64usize;
        let fft_size = num_bins as f32;
        let window_power_gain = 1.0_f32;
        let normalized = (fft_size * fft_size * window_power_gain).max(POWER_EPSILON);
        let correction = -10.0 * normalized.log10();

        let power: Vec<f32> = (1..=num_bins).map(|k| k as f32).collect();
        let dbfs: Vec<f32> = power
            .iter()
            .map(|&p| 10.0 * p.max(POWER_EPSILON).log10() + correction)
            .collect();

        for (k, &v) in dbfs.iter().enumerate() {
            let expected = 10.0 * ((k + 1) as f32).log10() + correction;
            assert!((v - expected).abs() < 1e-4, "bin {k}: {v} != {expected}");
        }

        let (noise_floor, peak_bin, _peak_power) = bin_stats(&dbfs);
        assert_eq!(peak_bin, num_bins - 1);

        let mut sorted = dbfs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected_floor = sorted[((num_bins as f32) * 0.25) as usize];
        assert!((noise_floor - expected_floor).abs() < 1e-6);
    }
}
