//! Incremental frame decoder.
//!
//! [`FrameDecoder::decode`] takes whatever one socket read produced and
//! returns every payload completed by it. Frames may arrive split at any
//! byte, including inside the header: partial headers are staged in a
//! small scratch area, and partial payloads are kept raw in a
//! [`FrameBuffer`] and unmasked once the frame completes.

use bytes::Bytes;
use tracing::trace;

use crate::buffer::FrameBuffer;
use crate::config::WebSocketConfig;
use crate::error::{WsError, WsResult};
use crate::frame::{apply_mask, FrameHeader, MAX_HEADER_LEN};

/// Header bytes received so far for the next frame.
#[derive(Debug, Default)]
struct HeaderScratch {
    bytes: [u8; MAX_HEADER_LEN],
    filled: usize,
}

impl HeaderScratch {
    /// Header length needed, as far as the bytes received so far tell.
    fn needed(&self) -> usize {
        if self.filled < 2 {
            2
        } else {
            FrameHeader::encoded_len(self.bytes[1])
        }
    }

    fn filled(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }
}

#[derive(Debug)]
enum DecodeState {
    /// Waiting for (the rest of) a frame header.
    Header(HeaderScratch),
    /// Header parsed; `buffer` holds the payload bytes received so far.
    Payload(FrameHeader),
}

/// Stateful decoder turning raw reads into complete payloads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: FrameBuffer,
    state: DecodeState,
    legacy_length_prefix: bool,
}

impl FrameDecoder {
    /// Create a decoder whose reassembly buffer holds `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: FrameBuffer::with_capacity(capacity),
            state: DecodeState::Header(HeaderScratch::default()),
            legacy_length_prefix: false,
        }
    }

    /// Create a decoder from connection configuration.
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(config.buffer_capacity).with_legacy_length_prefix(config.legacy_length_prefix)
    }

    /// Read only the low 4 bytes of 64-bit extended lengths.
    pub fn with_legacy_length_prefix(mut self, legacy: bool) -> Self {
        self.legacy_length_prefix = legacy;
        self
    }

    /// Declared length of the frame being reassembled, if any.
    pub fn pending_len(&self) -> Option<usize> {
        match &self.state {
            DecodeState::Payload(header) => Some(header.payload_len),
            DecodeState::Header(_) => None,
        }
    }

    /// Payload bytes buffered for the frame being reassembled.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the decoder sits exactly between two frames.
    pub fn is_idle(&self) -> bool {
        matches!(&self.state, DecodeState::Header(scratch) if scratch.filled == 0)
    }

    /// Decode one chunk of raw bytes.
    ///
    /// Returns the payloads completed by this chunk, in wire order. An
    /// error leaves the decoder in an unspecified state; the connection
    /// must be closed.
    pub fn decode(&mut self, chunk: &[u8]) -> WsResult<Vec<Bytes>> {
        let mut messages = Vec::new();
        let mut off = 0;

        while off < chunk.len() {
            match &mut self.state {
                DecodeState::Header(scratch) => {
                    let needed = scratch.needed();
                    let take = (needed - scratch.filled).min(chunk.len() - off);
                    scratch.bytes[scratch.filled..scratch.filled + take]
                        .copy_from_slice(&chunk[off..off + take]);
                    scratch.filled += take;
                    off += take;

                    // The second byte may reveal that more header bytes are due.
                    if scratch.filled < scratch.needed() {
                        continue;
                    }

                    let header = FrameHeader::decode(scratch.filled(), self.legacy_length_prefix)?;
                    *scratch = HeaderScratch::default();
                    off += self.start_payload(header, &chunk[off..], &mut messages)?;
                }
                DecodeState::Payload(header) => {
                    let header = *header;
                    let remaining = header.payload_len - self.buffer.len();
                    let available = chunk.len() - off;

                    if available >= remaining {
                        let mut payload = Vec::with_capacity(header.payload_len);
                        payload.extend_from_slice(self.buffer.unread());
                        payload.extend_from_slice(&chunk[off..off + remaining]);
                        if let Some(key) = header.mask_key {
                            apply_mask(&mut payload, key, 0);
                        }
                        off += remaining;
                        self.buffer.clear();
                        self.state = DecodeState::Header(HeaderScratch::default());
                        trace!(len = payload.len(), "reassembled frame completed");
                        messages.push(Bytes::from(payload));
                    } else {
                        self.buffer.append(&chunk[off..])?;
                        off = chunk.len();
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Handle the payload of a freshly parsed header.
    ///
    /// Returns how many bytes of `rest` were consumed.
    fn start_payload(
        &mut self,
        header: FrameHeader,
        rest: &[u8],
        messages: &mut Vec<Bytes>,
    ) -> WsResult<usize> {
        if header.payload_len > self.buffer.capacity() {
            return Err(WsError::capacity_exceeded(
                header.payload_len,
                self.buffer.capacity(),
            ));
        }

        if header.payload_len <= rest.len() {
            let mut payload = rest[..header.payload_len].to_vec();
            if let Some(key) = header.mask_key {
                apply_mask(&mut payload, key, 0);
            }
            messages.push(Bytes::from(payload));
            return Ok(header.payload_len);
        }

        self.buffer.clear();
        self.buffer.append(rest)?;
        trace!(
            declared = header.payload_len,
            buffered = rest.len(),
            "frame spans reads, buffering"
        );
        self.state = DecodeState::Payload(header);
        Ok(rest.len())
    }
}
