// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod agc;
pub mod detector;
pub mod pipeline;
pub mod stitcher;
pub mod sweep;
mod util;
pub mod window;

pub use agc::{GainRequest, SoftwareAgc};
pub use detector::{SignalDetector, SignalEvent};
pub use pipeline::DspPipeline;
pub use stitcher::Stitcher;
pub use sweep::{SweepEngine, SweepOutcome, SweepState};
pub use window::WindowTable;
