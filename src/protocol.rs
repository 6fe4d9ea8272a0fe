//! Text wire protocol
//!
//! # Stream (TCP)
//!
//! ```text
//! client → server:  "channel set 5\n"   (terminator optional, see below)
//! server → client:  "Active channel set to: 5\n"
//! ```
//!
//! Every outbound message ends with [`LINE_TERMINATOR`]. Inbound bytes are
//! split on `\n` (an optional `\r` is stripped). A line may span several reads,
//! so [`LineBuffer`] carries the unterminated tail over to the next read. The
//! tail is dispatched as a command once a short read shows the client has
//! stopped writing, since interactive clients send one bare command per write.
//!
//! # Datagram (UDP)
//!
//! One command per datagram and one reply datagram per command.

/// Appended to every outbound message
pub const LINE_TERMINATOR: &str = "\n";

/// Unterminated input kept before it is dispatched as a line anyway
pub const MAX_LINE_BYTES: usize = 4096;

/// Split a received chunk into trimmed, non-empty command lines
pub fn split_lines(chunk: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(chunk)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reassembles command lines from stream reads
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete line
    ///
    /// With `flush` set, the unterminated tail is returned as a line too.
    pub fn push(&mut self, chunk: &[u8], flush: bool) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(end) => {
                let complete: Vec<u8> = self.pending.drain(..=end).collect();
                split_lines(&complete)
            }
            None => Vec::new(),
        };

        if flush || self.pending.len() > MAX_LINE_BYTES {
            lines.extend(split_lines(&self.pending));
            self.pending.clear();
        }
        lines
    }

    /// Bytes waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Lower-case a command line and split it on whitespace
pub fn tokenize(line: &str) -> Vec<String> {
    line.trim()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Notification pushed to other clients when the active channel changes
pub fn channel_notification(channel: u32) -> String {
    format!("[Notification] Channel changed to {}", channel)
}
