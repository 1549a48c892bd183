//! Reassembly of log chunks into lines.

/// Splits an arbitrary chunk stream into complete lines.
///
/// A line may arrive split over several chunks; it is only emitted once its
/// terminating newline is seen, or on [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            let _ = line.pop();
            if line.ends_with('\r') {
                let _ = line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
