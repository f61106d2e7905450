//! Separator-based document framing.
//!
//! Each client's bytes accumulate in a [`FrameAssembler`] until the separator
//! arrives. The protocol carries one document per round trip, so bytes that
//! follow the separator in the same buffer are reported as leftover rather
//! than silently treated as the start of the next document.

use bytes::{Buf, Bytes, BytesMut};

/// A document extracted from a client's byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Bytes up to (excluding) the first separator.
    pub document: Bytes,
    /// Bytes after the separator, if any arrived.
    pub leftover: Option<Bytes>,
}

impl Frame {
    /// Accept the frame only if it carried exactly one document.
    pub fn into_document(self) -> Result<Bytes, FramingError> {
        match self.leftover {
            None => Ok(self.document),
            Some(rest) => Err(FramingError::Pipelined {
                document_len: self.document.len(),
                leftover: rest.len(),
            }),
        }
    }
}

/// Framing violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// More bytes followed the separator before the document was answered.
    Pipelined { document_len: usize, leftover: usize },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Pipelined {
                document_len,
                leftover,
            } => write!(
                f,
                "{leftover} bytes followed a {document_len}-byte document in the same frame"
            ),
        }
    }
}

impl std::error::Error for FramingError {}

/// Per-client accumulation buffer.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    /// Leading bytes of `buffer` already known to hold no separator.
    scanned: usize,
    separator: u8,
}

impl FrameAssembler {
    pub fn new(separator: u8) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            separator,
        }
    }

    /// Append a chunk and extract a document if the separator has arrived.
    ///
    /// On extraction the buffer is left empty, or holding the leftover when
    /// more bytes followed the separator. Without a separator the partial
    /// data stays buffered and `None` is returned.
    pub fn append(&mut self, chunk: &[u8]) -> Option<Frame> {
        self.buffer.extend_from_slice(chunk);
        let Some(pos) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == self.separator)
        else {
            self.scanned = self.buffer.len();
            return None;
        };

        let document = self.buffer.split_to(self.scanned + pos).freeze();
        self.buffer.advance(1);
        // A leftover may itself hold a separator.
        self.scanned = 0;

        let leftover = if self.buffer.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(&self.buffer))
        };

        Some(Frame { document, leftover })
    }

    /// Bytes buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}
