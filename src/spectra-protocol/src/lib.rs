// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod command;
pub mod wire;

pub use command::{
    encode_server_frame, parse_client_command, sanitize_filename, ClientCommand, DetectionParams,
    ServerFrame, SignalEventData,
};
pub use wire::{
    decode_panorama, decode_spectrum, decode_sweep_segment, encode_panorama, encode_spectrum,
    encode_sweep_segment, flags, frame_to_wire, MsgType, SpectrumWireFrame, PROTOCOL_VERSION,
};
