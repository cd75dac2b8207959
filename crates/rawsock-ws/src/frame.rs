//! Frame header codec, masking, and the outbound frame encoder.
//!
//! Wire layout of a frame:
//!
//! ```text
//! [fin/opcode][mask bit + 7-bit len][ext len: 0/2/8][mask key: 0/4][payload]
//! ```
//!
//! Server-to-client frames are never masked and always start with `0x81`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WsError, WsResult};

/// First byte of every outbound frame: FIN set, opcode 1.
pub const FINAL_FRAME_BYTE: u8 = 0x81;

/// Longest possible frame header: 2 base bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// Base length value announcing a 16-bit extended length.
const LEN_16: u8 = 126;

/// Base length value announcing a 64-bit extended length.
const LEN_64: u8 = 127;

const MASK_BIT: u8 = 0x80;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN bit.
    pub fin: bool,
    /// Opcode nibble. Parsed but not interpreted by the decoder.
    pub opcode: u8,
    /// Declared payload length.
    pub payload_len: usize,
    /// Mask key, present when the mask bit is set.
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Total header length implied by the second header byte.
    pub fn encoded_len(second_byte: u8) -> usize {
        let ext = match second_byte & 0x7F {
            LEN_16 => 2,
            LEN_64 => 8,
            _ => 0,
        };
        let mask = if second_byte & MASK_BIT == 0 { 0 } else { 4 };
        2 + ext + mask
    }

    /// Parse a complete header.
    ///
    /// `bytes` must hold at least [`encoded_len`](Self::encoded_len) bytes.
    /// With `legacy_length_prefix` the high 4 bytes of a 64-bit extended
    /// length are skipped, for peers that pad them with filler.
    pub fn decode(bytes: &[u8], legacy_length_prefix: bool) -> WsResult<Self> {
        if bytes.len() < 2 || bytes.len() < Self::encoded_len(bytes[1]) {
            return Err(WsError::protocol_error("incomplete frame header"));
        }

        let fin = bytes[0] & 0x80 != 0;
        let opcode = bytes[0] & 0x0F;
        let masked = bytes[1] & MASK_BIT != 0;
        let mut off = 2;

        let payload_len: u64 = match bytes[1] & 0x7F {
            LEN_16 => {
                off += 2;
                u64::from(u16::from_be_bytes([bytes[2], bytes[3]]))
            }
            LEN_64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[2..10]);
                off += 8;
                if legacy_length_prefix {
                    u64::from(u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]))
                } else {
                    u64::from_be_bytes(raw)
                }
            }
            n => u64::from(n),
        };
        let payload_len = usize::try_from(payload_len).map_err(|_| {
            WsError::protocol_error(format!("payload length {payload_len} is not addressable"))
        })?;

        let mask_key = masked.then(|| [bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

        Ok(Self {
            fin,
            opcode,
            payload_len,
            mask_key,
        })
    }
}

/// XOR `data` with `key`, treating `data[0]` as logical payload position `offset`.
///
/// The operation is its own inverse. A payload masked in pieces yields the
/// same bytes as masking it whole, as long as each piece passes its
/// position within the full payload.
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}

/// Number of header bytes an unmasked frame of `len` bytes needs.
fn header_len(len: usize) -> usize {
    if len < usize::from(LEN_16) {
        2
    } else if len < 65_536 {
        4
    } else {
        10
    }
}

fn put_header(dst: &mut BytesMut, first: u8, mask_bit: u8, len: usize) {
    dst.put_u8(first);
    if len < usize::from(LEN_16) {
        dst.put_u8(mask_bit | len as u8);
    } else if len < 65_536 {
        dst.put_u8(mask_bit | LEN_16);
        dst.put_u16(len as u16);
    } else {
        // High 4 bytes are zero for any length below 4 GiB.
        dst.put_u8(mask_bit | LEN_64);
        dst.put_u64(len as u64);
    }
}

/// Serialize `payload` into a single unmasked server-to-client frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(header_len(payload.len()) + payload.len());
    put_header(&mut dst, FINAL_FRAME_BYTE, 0, payload.len());
    dst.extend_from_slice(payload);
    dst.freeze()
}

/// Serialize `payload` into a masked frame, as a client would send it.
pub fn encode_masked_frame(payload: &[u8], mask_key: [u8; 4]) -> Bytes {
    let mut dst = BytesMut::with_capacity(header_len(payload.len()) + 4 + payload.len());
    put_header(&mut dst, FINAL_FRAME_BYTE, MASK_BIT, payload.len());
    dst.extend_from_slice(&mask_key);
    let start = dst.len();
    dst.extend_from_slice(payload);
    apply_mask(&mut dst[start..], mask_key, 0);
    dst.freeze()
}
