// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod error;
pub mod model;

pub use error::{SpectraError, SpectraResult};
pub use model::{
    AveragingMode, ClientId, DetectorConfig, DeviceParams, DspConfig, Panorama,
    RecorderState, RecordingDescriptor, RecordingKind, SampleBlock, SessionMode, SessionState,
    SpectrumFrame, SweepMode, SweepPlan, SweepSegment, SweepStep, TrackedSignal, WindowKind,
    UNSCANNED_DBFS,
};
