//! Sweep Planner/Engine. The step list itself lives in
//! [`spectra_core::SweepPlan`]; this module drives the per-step capture
//! state machine (`Preparing → Running → Draining → Complete | Aborted`).
//!
//! Assumes each incoming Sample Block is large enough to complete at
//! most one FFT frame per step capture call; the Device Source sizes
//! its blocks to the configured `fft_size` while a sweep is active.

use spectra_core::{
    AveragingMode, DeviceParams, DspConfig, SampleBlock, SpectraResult, SweepMode, SweepPlan,
    SweepSegment, WindowKind,
};

use crate::pipeline::DspPipeline;
use crate::stitcher::Stitcher;
use crate::util::wall_clock_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Preparing,
    Running,
    Draining,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
enum StepPhase {
    Settling { skipped: u32 },
    Capturing { captured: u32 },
}

pub enum SweepOutcome {
    Segment(SweepSegment),
    SegmentAndPanorama(SweepSegment, spectra_core::Panorama),
}

pub struct SweepEngine {
    plan: SweepPlan,
    averages: u32,
    settling_skip: u32,
    state: SweepState,
    step_idx: usize,
    phase: StepPhase,
    pipeline: DspPipeline,
    stitcher: Stitcher,
    sweep_id: u32,
    sweep_mode: SweepMode,
    started_at: std::time::Instant,
}

impl SweepEngine {
    pub fn start(
        plan: SweepPlan,
        averages: u32,
        settling_skip: u32,
        output_bins: usize,
        fft_size: usize,
        window_kind: WindowKind,
        sweep_id: u32,
        sweep_mode: SweepMode,
    ) -> SpectraResult<Self> {
        let averages = averages.max(1);
        let dsp_config = DspConfig {
            fft_size,
            window_kind,
            overlap_fraction: 0.0,
            averaging_mode: AveragingMode::Linear(averages),
            dc_removal: true,
            peak_hold: false,
            output_bins: Some(output_bins),
        };
        let pipeline = DspPipeline::new(dsp_config)?;
        let stitcher = Stitcher::new(plan.freq_start, plan.freq_end, output_bins);
        Ok(Self {
            plan,
            averages,
            settling_skip,
            state: SweepState::Preparing,
            step_idx: 0,
            phase: StepPhase::Settling { skipped: 0 },
            pipeline,
            stitcher,
            sweep_id,
            sweep_mode,
            started_at: std::time::Instant::now(),
        })
    }

    #[must_use]
    pub fn state(&self) -> SweepState {
        self.state
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&spectra_core::SweepStep> {
        self.plan.steps.get(self.step_idx)
    }

    /// Device parameters the hardware must be retuned to before capturing
    /// the current step: the step's center frequency and usable bandwidth,
    /// at the sweep's configured sample rate and the given gain.
    #[must_use]
    pub fn current_step_params(&self, gain: f32) -> Option<DeviceParams> {
        let step = self.plan.steps.get(self.step_idx)?;
        Some(DeviceParams {
            sample_rate: self.plan.sample_rate,
            center_freq: step.center_freq,
            gain,
            bandwidth: step.usable_bw,
        })
    }

    /// Called once the coordinator has applied the first step's
    /// center/rate/gain and paused the live DSP path.
    pub fn begin_running(&mut self) {
        self.state = SweepState::Running;
    }

    pub fn abort(&mut self) {
        self.state = SweepState::Aborted;
    }

    pub fn mark_complete(&mut self) {
        self.state = SweepState::Complete;
    }

    /// Feeds one Sample Block through the current step's capture. Returns
    /// a completed segment (and, on the last step, the panorama) once
    /// `averages` frames have been captured for this step.
    pub fn on_block(&mut self, block: &SampleBlock) -> SpectraResult<Option<SweepOutcome>> {
        if self.state != SweepState::Running {
            return Ok(None);
        }
        match &mut self.phase {
            StepPhase::Settling { skipped } => {
                *skipped += 1;
                if *skipped >= self.settling_skip {
                    self.phase = StepPhase::Capturing { captured: 0 };
                }
                Ok(None)
            }
            StepPhase::Capturing { .. } => self.capture_block(block),
        }
    }

    fn capture_block(&mut self, block: &SampleBlock) -> SpectraResult<Option<SweepOutcome>> {
        let Some(frame) = self.pipeline.process_frame(block, 0.0)? else {
            return Ok(None);
        };
        let captured = match &mut self.phase {
            StepPhase::Capturing { captured } => {
                *captured += 1;
                *captured
            }
            StepPhase::Settling { .. } => unreachable!("settling handled by on_block"),
        };
        if captured < self.averages {
            return Ok(None);
        }

        let step = self.plan.steps[self.step_idx];
        let windowed = frame.bins[step.bin_lo..step.bin_hi].to_vec();
        let total_segments = self.plan.steps.len() as u16;
        let segment = SweepSegment {
            sweep_id: self.sweep_id,
            segment_idx: self.step_idx as u16,
            total_segments,
            freq_lo: step.freq_lo,
            freq_hi: step.freq_hi,
            sweep_start: self.plan.freq_start,
            sweep_end: self.plan.freq_end,
            bins: windowed.clone(),
        };
        self.stitcher.add_segment(step.freq_lo, step.freq_hi, &windowed);

        let is_last = self.step_idx + 1 == self.plan.steps.len();
        if is_last {
            let sweep_time_ms = self.started_at.elapsed().as_secs_f32() * 1000.0;
            let panorama =
                self.stitcher
                    .finish(self.sweep_id, self.sweep_mode, sweep_time_ms, wall_clock_seconds());
            self.state = SweepState::Draining;
            Ok(Some(SweepOutcome::SegmentAndPanorama(segment, panorama)))
        } else {
            self.step_idx += 1;
            self.phase = StepPhase::Settling { skipped: 0 };
            let cfg = self.pipeline.config();
            self.pipeline.set_param(cfg)?;
            Ok(Some(SweepOutcome::Segment(segment)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectra_core::SweepPlan;

    fn make_block(fft_size: usize) -> SampleBlock {
        SampleBlock {
            samples: vec![0.05; fft_size * 2],
            center_freq: 100e6,
            sample_rate: 10e6,
            seq: 0,
        }
    }

    #[test]
    fn emits_segments_in_order_and_panorama_on_last_step() {
        let plan = SweepPlan::compute(100e6, 130e6, 10e6, 0.8, 64).unwrap();
        let total = plan.steps.len();
        let mut engine = SweepEngine::start(
            plan,
            1,
            0,
            64,
            256,
            WindowKind::Rectangular,
            1,
            SweepMode::Survey,
        )
        .unwrap();
        engine.begin_running();

        let mut segment_indices = Vec::new();
        let mut saw_panorama = false;
        for _ in 0..(total * 2) {
            if let Some(outcome) = engine.on_block(&make_block(256)).unwrap() {
                match outcome {
                    SweepOutcome::Segment(seg) => segment_indices.push(seg.segment_idx),
                    SweepOutcome::SegmentAndPanorama(seg, _) => {
                        segment_indices.push(seg.segment_idx);
                        saw_panorama = true;
                    }
                }
            }
        }

        assert_eq!(segment_indices, (0..total as u16).collect::<Vec<_>>());
        assert!(saw_panorama);
        assert_eq!(engine.state(), SweepState::Draining);
    }

    #[test]
    fn step_params_track_step_advance() {
        let plan = SweepPlan::compute(100e6, 130e6, 10e6, 0.8, 64).unwrap();
        let mut engine = SweepEngine::start(
            plan,
            1,
            0,
            64,
            256,
            WindowKind::Rectangular,
            1,
            SweepMode::Survey,
        )
        .unwrap();
        engine.begin_running();

        let first = engine.current_step_params(10.0).unwrap();
        assert_eq!(first.center_freq, engine.current_step().unwrap().center_freq);
        assert_eq!(first.gain, 10.0);

        while matches!(
            engine.on_block(&make_block(256)).unwrap(),
            None
        ) {}
        // a step boundary has now been crossed; the params must follow it.
        let second = engine.current_step_params(10.0).unwrap();
        assert_ne!(first.center_freq, second.center_freq);
    }
}
