//! Text command/status surface: client→server JSON commands over the
//! same connection as the binary stream, and the server→client
//! status/event/error frames. Parsing accepts either a structured
//! request or a bare command.

use serde::{Deserialize, Serialize};
use spectra_core::{RecordingDescriptor, SessionState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    SetFrequency { value: f64 },
    SetGain { value: f32 },
    SetBandwidth { value: f64 },
    SetSampleRate { value: f64 },
    SetFftSize { value: usize },
    SetDsp { params: serde_json::Value },
    SetAgc { enabled: bool },
    SweepStart {
        mode: String,
        freq_start: f64,
        freq_end: f64,
        sample_rate: f64,
        averages: u32,
    },
    SweepStop,
    DetectionEnable { enabled: bool },
    DetectionSet { params: DetectionParams },
    RecIqStart,
    RecIqStop,
    RecSpectrumStart,
    RecSpectrumStop,
    RecList,
    RecDelete { filename: String },
    PlaybackStart { filename: String },
    PlaybackPause,
    PlaybackResume,
    PlaybackStop,
    PlaybackSpeed { value: f32 },
    PlaybackLoop { enabled: bool },
    GetStatus,
    CheckDevice,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionParams {
    pub threshold_db: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        data: SessionState,
    },
    SignalEvent {
        data: SignalEventData,
    },
    RecList {
        data: Vec<RecordingDescriptor>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEventData {
    pub event: String,
    pub signal_id: u64,
    pub center_freq: f64,
    pub bandwidth: f64,
    pub peak_power: f32,
}

/// Parses a client text frame: tries the structured `ClientCommand` shape
/// first, then falls back to treating the whole payload as a bare
/// `{"command": "..."}` variant, matching `parse_envelope`'s
/// structured-then-bare fallback.
pub fn parse_client_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode_server_frame(frame: &ServerFrame) -> String {
    serde_json::to_string(frame).unwrap_or_else(|_| {
        r#"{"type":"error","message":"failed to encode server frame"}"#.to_string()
    })
}

/// Reduces a client-supplied filename to its terminal path component,
/// guarding the Recorder against path traversal.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    std::path::Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_command() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"command":"start"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Start));
    }

    #[test]
    fn parses_command_with_payload() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"command":"set_frequency","value":100000000.0}"#).unwrap();
        match cmd {
            ClientCommand::SetFrequency { value } => assert_eq!(value, 1e8),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_sweep_start() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"command":"sweep_start","mode":"survey","freq_start":1e8,"freq_end":1.3e8,"sample_rate":1e7,"averages":4}"#,
        )
        .unwrap();
        assert!(matches!(cmd, ClientCommand::SweepStart { averages: 4, .. }));
    }

    #[test]
    fn rejects_unknown_command() {
        let result: Result<ClientCommand, _> = serde_json::from_str(r#"{"command":"bogus"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn sanitize_filename_strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("/var/recordings/a.iq"), "a.iq");
        assert_eq!(sanitize_filename("plain.iq"), "plain.iq");
    }

    #[test]
    fn error_frame_round_trips_through_json() {
        let frame = ServerFrame::Error {
            message: "bad command".to_string(),
        };
        let encoded = encode_server_frame(&frame);
        assert!(encoded.contains("\"type\":\"error\""));
    }
}
