//! Data model shared by the DSP pipeline, the backend, the protocol and
//! the server: Sample Block, DSP Config, Spectrum Frame, Sweep Plan/Step,
//! Sweep Segment, Panorama, Tracked Signal, Recording Descriptor, Client
//! Session and Session State.

use serde::{Deserialize, Serialize};

use crate::error::{SpectraError, SpectraResult};

/// Reserved dBFS value for panorama bins no sweep step has written yet.
/// Must be filtered out of the detector and any auto-scale/color-map
/// aggregation by direct comparison.
pub const UNSCANNED_DBFS: f32 = -200.0;

/// A contiguous run of complex samples tagged with the capture parameters
/// in force. Owned by the producer; consumed exactly once by the DSP
/// worker or dropped by the Sample Bridge.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Interleaved I/Q pairs, `len() == 2 * num_samples`.
    pub samples: Vec<f32>,
    pub center_freq: f64,
    pub sample_rate: f64,
    /// Monotonically increasing, assigned by the Device Source. Used only
    /// to check the no-reorder invariant; not part of any wire format.
    pub seq: u64,
}

impl SampleBlock {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Window function applied before the FFT. Each has a coherent-gain
/// correction baked into [`WindowKind::coherent_gain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    Hanning,
    Blackman,
    BlackmanHarris,
    FlatTop,
    Kaiser6,
    Kaiser10,
    Kaiser14,
}

impl WindowKind {
    /// Kaiser beta per sub-variant, chosen as reasonable production defaults.
    #[must_use]
    pub fn kaiser_beta(self) -> Option<f64> {
        match self {
            Self::Kaiser6 => Some(6.0),
            Self::Kaiser10 => Some(8.6),
            Self::Kaiser14 => Some(12.0),
            _ => None,
        }
    }
}

/// Averaging applied in the linear power domain. Never applied in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "param")]
pub enum AveragingMode {
    None,
    Linear(u32),
    Exponential(f32),
}

impl AveragingMode {
    pub fn validate(&self) -> SpectraResult<()> {
        match self {
            Self::None => Ok(()),
            Self::Linear(n) if *n == 0 => {
                Err(SpectraError::invalid_config("linear averaging N must be > 0"))
            }
            Self::Linear(_) => Ok(()),
            Self::Exponential(alpha) if !(*alpha > 0.0 && *alpha <= 1.0) => Err(
                SpectraError::invalid_config("exponential averaging alpha must be in (0, 1]"),
            ),
            Self::Exponential(_) => Ok(()),
        }
    }
}

/// Immutable DSP configuration snapshot. `set_param` replaces this as a
/// whole under the pipeline-internal lock; size-changing reconfiguration
/// emits a `StateReset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspConfig {
    pub fft_size: usize,
    pub window_kind: WindowKind,
    /// 0.0 or 0.5.
    pub overlap_fraction: f32,
    pub averaging_mode: AveragingMode,
    pub dc_removal: bool,
    pub peak_hold: bool,
    pub output_bins: Option<usize>,
}

impl DspConfig {
    pub fn validate(&self) -> SpectraResult<()> {
        if self.fft_size < 256 || self.fft_size > 8192 || !self.fft_size.is_power_of_two() {
            return Err(SpectraError::invalid_config(format!(
                "fft_size {} must be a power of two in [256, 8192]",
                self.fft_size
            )));
        }
        if self.overlap_fraction != 0.0 && self.overlap_fraction != 0.5 {
            return Err(SpectraError::invalid_config(
                "overlap_fraction must be 0 or 0.5",
            ));
        }
        self.averaging_mode.validate()?;
        if let Some(bins) = self.output_bins {
            if bins == 0 || bins > self.fft_size {
                return Err(SpectraError::invalid_config(
                    "output_bins must be nonzero and <= fft_size",
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn output_bins_or_fft_size(&self) -> usize {
        self.output_bins.unwrap_or(self.fft_size)
    }
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            window_kind: WindowKind::Hanning,
            overlap_fraction: 0.0,
            averaging_mode: AveragingMode::None,
            dc_removal: true,
            peak_hold: false,
            output_bins: None,
        }
    }
}

/// One finalized spectrum, ready for the protocol encoder and the
/// detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumFrame {
    pub bins: Vec<f32>,
    pub peak_hold: Option<Vec<f32>>,
    pub timestamp: f64,
    pub center_freq: f64,
    pub sample_rate: f64,
    pub bandwidth: f64,
    pub gain: f32,
    pub fft_size: u32,
    pub noise_floor: f32,
    pub peak_bin: usize,
    pub peak_power: f32,
}

impl SpectrumFrame {
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }
}

/// One retune step of a sweep plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepStep {
    pub center_freq: f64,
    pub usable_bw: f64,
    pub freq_lo: f64,
    pub freq_hi: f64,
    pub bin_lo: usize,
    pub bin_hi: usize,
}

/// Ordered list of retune steps tiling `[freq_start, freq_end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub freq_start: f64,
    pub freq_end: f64,
    pub sample_rate: f64,
    pub usable_fraction: f64,
    pub steps: Vec<SweepStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    Survey,
    BandMonitor,
}

/// One step's averaged spectrum, tagged with its place in the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSegment {
    pub sweep_id: u32,
    pub segment_idx: u16,
    pub total_segments: u16,
    pub freq_lo: f64,
    pub freq_hi: f64,
    pub sweep_start: f64,
    pub sweep_end: f64,
    pub bins: Vec<f32>,
}

/// Completed stitched spectrum covering `[freq_start, freq_end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panorama {
    pub sweep_id: u32,
    pub sweep_mode: SweepMode,
    pub freq_start: f64,
    pub freq_end: f64,
    pub bins: Vec<f32>,
    pub sweep_time_ms: f32,
    pub timestamp: f64,
}

/// A signal tracked across frames by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSignal {
    pub signal_id: u64,
    pub center_freq: f64,
    pub bandwidth: f64,
    pub peak_power: f32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub hit_count: u32,
    pub miss_count: u32,
    pub classification: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    Iq,
    Spectrum,
}

/// Sidecar metadata persisted alongside a recording file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDescriptor {
    pub kind: RecordingKind,
    pub filename: String,
    pub byte_size: u64,
    pub created_at: f64,
    pub sample_rate: f64,
    pub center_freq: f64,
    pub fft_size: Option<u32>,
    pub window_kind: Option<WindowKind>,
    /// IQ: total sample count. Spectrum: total frame count.
    pub duration_or_frame_count: u64,
}

/// Opaque handle for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

/// Global session mode. Single writer (the coordinator) at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Idle,
    Live,
    SweepRunning,
    Playback,
}

/// Device parameters in force, independent of DSP configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain: f32,
    pub bandwidth: f64,
}

impl DeviceParams {
    pub fn validate(&self) -> SpectraResult<()> {
        if self.sample_rate <= 0.0 {
            return Err(SpectraError::invalid_config("sample_rate must be positive"));
        }
        if self.bandwidth <= 0.0 {
            return Err(SpectraError::invalid_config("bandwidth must be positive"));
        }
        Ok(())
    }
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            sample_rate: 2_000_000.0,
            center_freq: 100_000_000.0,
            gain: 20.0,
            bandwidth: 2_000_000.0,
        }
    }
}

/// Detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub enabled: bool,
    pub threshold_db: f32,
    pub miss_count_limit: u32,
    pub freq_tol_hz: Option<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: 10.0,
            miss_count_limit: 3,
            freq_tol_hz: None,
        }
    }
}

/// Recorder enable flags, surfaced in status snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderState {
    pub iq_recording: bool,
    pub spectrum_recording: bool,
}

/// Authoritative, coordinator-owned session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub mode: SessionMode,
    pub dsp_config: DspConfig,
    pub device: DeviceParams,
    pub recorder: RecorderState,
    pub detector: DetectorConfig,
    pub device_connected: bool,
    pub device_error: Option<String>,
    pub dropped_sample_blocks: u64,
    pub next_sweep_id: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: SessionMode::Idle,
            dsp_config: DspConfig::default(),
            device: DeviceParams::default(),
            recorder: RecorderState::default(),
            detector: DetectorConfig::default(),
            device_connected: false,
            device_error: None,
            dropped_sample_blocks: 0,
            next_sweep_id: 1,
        }
    }
}

impl SweepPlan {
    /// Computes the step list:
    /// `usable_bw = sample_rate * usable_fraction`, first center at
    /// `freq_start + usable_bw/2`, steps advance by `usable_bw`, terminate
    /// when `center - usable_bw/2 >= freq_end`.
    pub fn compute(
        freq_start: f64,
        freq_end: f64,
        sample_rate: f64,
        usable_fraction: f64,
        output_bins: usize,
    ) -> SpectraResult<Self> {
        if freq_start >= freq_end {
            return Err(SpectraError::invalid_config("freq_start must be < freq_end"));
        }
        if !(usable_fraction > 0.0 && usable_fraction <= 1.0) {
            return Err(SpectraError::invalid_config(
                "usable_fraction must be in (0, 1]",
            ));
        }
        if sample_rate <= 0.0 {
            return Err(SpectraError::invalid_config("sample_rate must be positive"));
        }

        let usable_bw = sample_rate * usable_fraction;
        let bin_span = ((output_bins as f64) * usable_fraction).ceil() as usize;
        let bin_span = bin_span.min(output_bins).max(1);
        let margin = (output_bins - bin_span) / 2;

        let mut steps = Vec::new();
        let mut center = freq_start + usable_bw / 2.0;
        while center - usable_bw / 2.0 < freq_end {
            steps.push(SweepStep {
                center_freq: center,
                usable_bw,
                freq_lo: center - usable_bw / 2.0,
                freq_hi: center + usable_bw / 2.0,
                bin_lo: margin,
                bin_hi: margin + bin_span,
            });
            center += usable_bw;
        }

        Ok(Self {
            freq_start,
            freq_end,
            sample_rate,
            usable_fraction,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_plan_determinism() {
        let plan =
            SweepPlan::compute(100_000_000.0, 130_000_000.0, 10_000_000.0, 0.8, 1024).unwrap();
        assert_eq!(plan.steps.len(), 4);
        let centers: Vec<f64> = plan.steps.iter().map(|s| s.center_freq).collect();
        assert!((centers[0] - 104_000_000.0).abs() < 1e-6);
        assert!((centers[1] - 112_000_000.0).abs() < 1e-6);
        assert!((centers[2] - 120_000_000.0).abs() < 1e-6);
        assert!((centers[3] - 128_000_000.0).abs() < 1e-6);
        assert!((plan.steps[3].freq_hi - 132_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn dsp_config_rejects_non_power_of_two() {
        let mut cfg = DspConfig::default();
        cfg.fft_size = 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dsp_config_rejects_bad_overlap() {
        let mut cfg = DspConfig::default();
        cfg.overlap_fraction = 0.25;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn averaging_mode_rejects_zero_n() {
        assert!(AveragingMode::Linear(0).validate().is_err());
        assert!(AveragingMode::Linear(4).validate().is_ok());
    }

    #[test]
    fn averaging_mode_rejects_alpha_out_of_range() {
        assert!(AveragingMode::Exponential(0.0).validate().is_err());
        assert!(AveragingMode::Exponential(1.5).validate().is_err());
        assert!(AveragingMode::Exponential(0.2).validate().is_ok());
    }
}
