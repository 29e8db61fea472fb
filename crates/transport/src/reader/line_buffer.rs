use bytes::BytesMut;

/// Reassembles newline-terminated lines from arbitrarily fragmented reads
///
/// Bytes are split on `\n` before decoding, so a multi-byte character spread
/// over two reads is decoded whole. Invalid UTF-8 is replaced rather than
/// rejected.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order
    ///
    /// Returned lines always end with `\n`. An unterminated tail stays
    /// buffered until a later chunk terminates it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // the pending tail never holds a newline, so only the new chunk is searched
        let Some(first) = chunk.iter().position(|b| *b == b'\n') else {
            self.pending.extend_from_slice(chunk);
            return Vec::new();
        };

        let mut search_from = self.pending.len() + first;
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.pending[search_from..].iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(search_from + offset + 1);
            lines.push(String::from_utf8_lossy(&line).into_owned());
            search_from = 0;
        }
        lines
    }

    /// The buffered bytes of the current partial line
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
