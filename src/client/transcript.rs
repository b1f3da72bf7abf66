use chrono::{DateTime, Local};
use std::fmt;

/// Direction of one protocol event as seen from the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data written to the server.
    Send,
    /// Data read from the server.
    Recv,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Send => ">>>",
            Direction::Recv => "<<<",
        }
    }
}

/// One recorded protocol event.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Whether this was sent or received.
    pub direction: Direction,
    /// Wall-clock time the event was recorded.
    pub timestamp: DateTime<Local>,
    /// The raw payload, newlines included.
    pub payload: String,
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let display = self.payload.replace('\n', "\\n");
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.direction.prefix(),
            display
        )
    }
}

/// An ordered, debugging-only record of protocol traffic.
///
/// Entries are appended in arrival order and never feed back into response
/// classification; the transcript exists purely so a failing test can show
/// exactly what went over the wire.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, stamped with the current wall-clock time.
    pub fn record(&mut self, direction: Direction, payload: &str) {
        self.entries.push(TranscriptEntry {
            direction,
            timestamp: Local::now(),
            payload: payload.to_string(),
        });
    }

    /// All recorded events, in arrival order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Format the whole transcript as a human-readable string.
    pub fn format(&self) -> String {
        self.entries
            .iter()
            .map(TranscriptEntry::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_arrival_order() {
        let mut transcript = Transcript::new();
        transcript.record(Direction::Send, ";1 + 1\n");
        transcript.record(Direction::Recv, "#-1:  => 2\n");

        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Send);
        assert_eq!(entries[1].direction, Direction::Recv);
    }

    #[test]
    fn formats_with_visible_newlines() {
        let mut transcript = Transcript::new();
        transcript.record(Direction::Send, "connect Wizard\n");
        let formatted = transcript.format();
        assert!(formatted.contains(">>> connect Wizard\\n"));
    }
}
