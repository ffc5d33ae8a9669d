//! Classification of sc standard output.
//!
//! Output arrives in arbitrary chunks; [`LineBuffer`] reassembles complete
//! lines, and each line is scanned against an ordered trigger table. The
//! first trigger contained in the line fires and scanning stops, so the
//! table order encodes precedence. A terminal error, once latched, is
//! never replaced by a later line.

use std::sync::OnceLock;

use regex::Regex;

use crate::tunnel::supervisor::ConnectError;

/// Mutable tunnel state driven by output classification and the exit
/// handler.
#[derive(Debug, Default)]
pub struct TunnelState {
    pub tunnel_id: Option<String>,
    pub port: Option<u16>,
    pub error: Option<ConnectError>,
}

impl TunnelState {
    fn latch_error(&mut self, error: ConnectError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

/// Chunk-to-line reassembly buffer.
///
/// Retains the trailing partial segment (including split UTF-8 sequences)
/// until the next chunk completes it, so newline ordering is preserved
/// across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the complete lines it finished, trimmed,
    /// with blank lines dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Connecting,
    CaptureTunnelId,
    CapturePort,
    Outdated,
    Unauthorized,
    ConnectionFailed,
    GenericError,
    Goodbye,
}

/// Ordered substring triggers; first match wins.
const TRIGGERS: &[(&str, Action)] = &[
    (
        "Please wait for 'you may start your tests' to start your tests",
        Action::Connecting,
    ),
    ("Tunnel ID:", Action::CaptureTunnelId),
    ("Selenium listener started on port", Action::CapturePort),
    (
        "This version of Sauce Connect is outdated",
        Action::Outdated,
    ),
    ("Not authorized", Action::Unauthorized),
    (
        "Sauce Connect could not establish a connection",
        Action::ConnectionFailed,
    ),
    ("Error: ", Action::GenericError),
    ("Error bringing", Action::GenericError),
    ("{\"error\":", Action::GenericError),
    ("Goodbye.", Action::Goodbye),
];

/// A more specific error line reliably follows this one, so it never
/// latches an error by itself.
const SUPPRESSED_ERROR_MARKER: &str = "HTTP response code indicated failure";

// Compiled once; classification runs per output line.
fn tunnel_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)tunnel id:\s*([a-z0-9]+)").expect("tunnel id pattern is valid")
    })
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)port\s*([0-9]+)").expect("port pattern is valid"))
}

/// Scan one complete output line and update the tunnel state.
pub fn classify_line(line: &str, state: &mut TunnelState) {
    for (pattern, action) in TRIGGERS {
        if !line.contains(pattern) {
            continue;
        }

        match action {
            Action::Connecting => {
                log::info!("Creating tunnel with Sauce Labs");
            }
            Action::CaptureTunnelId => {
                if let Some(captures) = tunnel_id_pattern().captures(line) {
                    state.tunnel_id = Some(captures[1].to_string());
                }
            }
            Action::CapturePort => {
                if let Some(port) = port_pattern()
                    .captures(line)
                    .and_then(|c| c[1].parse().ok())
                {
                    state.port = Some(port);
                }
            }
            Action::Outdated => {
                log::warn!("This version of Sauce Connect is outdated");
            }
            Action::Unauthorized => {
                log::error!("Invalid Sauce Connect credentials");
                state.latch_error(ConnectError::Unauthorized(line.to_string()));
            }
            Action::ConnectionFailed => {
                log::error!("Sauce Connect API failure");
                state.latch_error(ConnectError::ConnectionFailed(line.to_string()));
            }
            Action::GenericError => {
                if !line.contains(SUPPRESSED_ERROR_MARKER) {
                    state.latch_error(ConnectError::Generic(line.to_string()));
                }
            }
            Action::Goodbye => {
                log::info!("Sauce Connect is shutting down");
            }
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(lines: &[&str]) -> TunnelState {
        let mut state = TunnelState::default();
        for line in lines {
            classify_line(line, &mut state);
        }
        state
    }

    #[test]
    fn test_tunnel_id_and_port_capture() {
        let state = feed(&[
            "Tunnel ID: abc123",
            "Selenium listener started on port 4445",
        ]);
        assert_eq!(state.tunnel_id.as_deref(), Some("abc123"));
        assert_eq!(state.port, Some(4445));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_repeated_announcements_take_the_latest() {
        let state = feed(&[
            "Tunnel ID: first1",
            "Tunnel ID: second2",
            "Selenium listener started on port 4445",
            "Selenium listener started on port 4446",
        ]);
        assert_eq!(state.tunnel_id.as_deref(), Some("second2"));
        assert_eq!(state.port, Some(4446));
    }

    #[test]
    fn test_unauthorized_latches() {
        let state = feed(&["something Not authorized something"]);
        assert!(matches!(state.error, Some(ConnectError::Unauthorized(_))));
    }

    #[test]
    fn test_first_error_is_not_overwritten() {
        let state = feed(&[
            "Not authorized",
            "Error: some completely different failure",
            "Sauce Connect could not establish a connection",
        ]);
        match state.error {
            Some(ConnectError::Unauthorized(detail)) => {
                assert!(detail.contains("Not authorized"));
            }
            other => panic!("expected latched Unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn test_connection_failure_carries_full_line() {
        let line = "Sauce Connect could not establish a connection to Sauce Labs";
        let state = feed(&[line]);
        match state.error {
            Some(ConnectError::ConnectionFailed(detail)) => assert_eq!(detail, line),
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_http_failure_line_is_suppressed() {
        let state = feed(&["Error: HTTP response code indicated failure."]);
        assert!(state.error.is_none());

        // The specific message that follows still latches.
        let state = feed(&[
            "Error: HTTP response code indicated failure.",
            "Error: Not authorized.",
        ]);
        assert!(matches!(state.error, Some(ConnectError::Unauthorized(_))));
    }

    #[test]
    fn test_json_error_body() {
        let state = feed(&[r#"{"error": "tunnel limit exceeded"}"#]);
        assert!(matches!(state.error, Some(ConnectError::Generic(_))));
    }

    #[test]
    fn test_informational_lines_change_nothing() {
        let state = feed(&[
            "Please wait for 'you may start your tests' to start your tests",
            "This version of Sauce Connect is outdated, please update to 4.9.2",
            "Goodbye.",
        ]);
        assert!(state.tunnel_id.is_none());
        assert!(state.port.is_none());
        assert!(state.error.is_none());
    }

    #[test]
    fn test_line_buffer_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        let mut state = TunnelState::default();

        for chunk in [&b"Tunnel ID: a"[..], &b"bc123\n"[..]] {
            for line in buffer.push(chunk) {
                classify_line(&line, &mut state);
            }
        }
        assert_eq!(state.tunnel_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_line_buffer_multiple_lines_one_chunk() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\ntwo\n\nthree");
        assert_eq!(lines, vec!["one", "two"]);
        let lines = buffer.push(b"\n");
        assert_eq!(lines, vec!["three"]);
    }

    #[test]
    fn test_line_buffer_preserves_order() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"first\nsecond\nthird\n");
        assert_eq!(lines, vec!["first", "second", "third"]);
    }
}
