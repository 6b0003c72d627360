/// Partial buffer larger than this is trimmed to the newest `PARTIAL_KEEP` bytes.
pub const PARTIAL_LIMIT: usize = 8192;
pub const PARTIAL_KEEP: usize = 4096;

/// Reassembles newline-terminated lines from arbitrary read chunks.
///
/// Lines end at `\n` or `\r` (runs of terminators count as one). Bytes are decoded as lossy
/// UTF-8 per line, so a multi-byte character split across reads survives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    trims: u64,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every completed, trimmed, non-empty line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.partial[start..].iter().position(|b| *b == b'\n' || *b == b'\r') {
            let end = start + pos;
            let line = String::from_utf8_lossy(&self.partial[start..end]);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
            start = end + 1;
        }
        self.partial.drain(..start);

        if self.partial.len() > PARTIAL_LIMIT {
            let cut = self.partial.len() - PARTIAL_KEEP;
            self.partial.drain(..cut);
            self.trims += 1;
            log::debug!("Partial line exceeded {} bytes, kept newest {}", PARTIAL_LIMIT, PARTIAL_KEEP);
        }
        lines
    }

    /// Number of times an unterminated line was trimmed.
    pub fn trims(&self) -> u64 {
        self.trims
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}
