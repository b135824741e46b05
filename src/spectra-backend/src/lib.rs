// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod bridge;
#[cfg(feature = "soapysdr-sys")]
pub mod real;
pub mod source;

pub use bridge::SampleBridge;
#[cfg(feature = "soapysdr-sys")]
pub use real::RealDeviceSource;
pub use source::{spawn_producer, DeviceSource, MockSource, SyntheticSource};
