//! Length-prefixed wire frames.
//!
//! Every message on the wire is `u32 size (including itself, LE)` then
//! `u16 opcode (LE)` then `size - 6` payload bytes. The outer frame is
//! never encrypted; the envelopes that are live inside the payload and
//! are unwrapped by [`decode_inner`] / [`decode_packed`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// `size` + `opcode`.
pub const HEADER_SIZE: usize = 6;

/// Default cap on a whole frame, size field included.
pub const DEFAULT_MAX_FRAME: usize = 65_536;

/// The packed-world prefix tags the reference client has been observed to
/// send. Their meaning is undocumented; both are passed through.
pub const PACKED_WORLD_TAGS: [u8; 2] = [11, 19];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub payload: Bytes,
}

/// Reassembles frames out of an arbitrarily chunked byte stream.
///
/// Feeding bytes never blocks and never fails; violations surface on
/// [`FrameDecoder::decode`], which the connection task treats as fatal.
///
/// # Test
///
/// ```
/// use wildstar_server_codec::frame::{encode_frame, Frame, FrameDecoder};
/// use bytes::BytesMut;
///
/// let mut wire = BytesMut::new();
/// encode_frame(0x0921, &[1, 2, 3], &mut wire).unwrap();
///
/// // The same frames come out no matter how the stream is chunked.
/// let mut decoder = FrameDecoder::default();
/// for byte in &wire[..] {
///     decoder.extend(std::slice::from_ref(byte));
/// }
///
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame.opcode, 0x0921);
/// assert_eq!(&frame.payload[..], &[1, 2, 3]);
/// assert!(decoder.decode().unwrap().is_none());
/// ```
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn writer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes buffered towards an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn decode(&mut self) -> Result<Option<Frame>, Error> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let size = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if (size as usize) < HEADER_SIZE {
            return Err(Error::FrameTooShort(size));
        }
        if size as usize > self.max_frame {
            return Err(Error::FrameTooLarge(size));
        }

        if self.buf.len() < size as usize {
            return Ok(None);
        }

        let mut chunk = self.buf.split_to(size as usize);
        chunk.advance(4);
        let opcode = chunk.get_u16_le();

        Ok(Some(Frame {
            opcode,
            payload: chunk.freeze(),
        }))
    }
}

/// Append one frame to `dst`.
pub fn encode_frame(opcode: u16, payload: &[u8], dst: &mut BytesMut) -> Result<(), Error> {
    let size = HEADER_SIZE + payload.len();
    if size > DEFAULT_MAX_FRAME {
        return Err(Error::FrameTooLarge(size as u32));
    }

    dst.put_u32_le(size as u32);
    dst.put_u16_le(opcode);
    dst.put_slice(payload);
    Ok(())
}

/// Build the inner frame carried by a `ServerEncrypted` envelope:
/// `u32 inner_size (including itself) · u16 opcode · payload`.
pub fn encode_inner(opcode: u16, payload: &[u8]) -> Vec<u8> {
    let size = HEADER_SIZE + payload.len();
    let mut inner = Vec::with_capacity(size);
    inner.extend_from_slice(&(size as u32).to_le_bytes());
    inner.extend_from_slice(&opcode.to_le_bytes());
    inner.extend_from_slice(payload);
    inner
}

/// Split a decrypted `ClientEncrypted` body into `(opcode, payload)`.
pub fn decode_inner(bytes: &[u8]) -> Result<(u16, &[u8]), Error> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::ShortInput);
    }

    let size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size < HEADER_SIZE {
        return Err(Error::FrameTooShort(size as u32));
    }
    if size > bytes.len() {
        return Err(Error::ShortInput);
    }

    let opcode = u16::from_le_bytes([bytes[4], bytes[5]]);
    Ok((opcode, &bytes[HEADER_SIZE..size]))
}

/// Unwrap a `ClientPacked` body: a plain inner frame with no prefix tag.
pub fn decode_packed(bytes: &[u8]) -> Result<(u16, &[u8]), Error> {
    decode_inner(bytes)
}

/// Unwrap a `ClientPackedWorld` body: a 5-bit tag, realignment to the
/// next byte boundary, then an inner frame.
///
/// # Test
///
/// ```
/// use wildstar_server_codec::frame::{decode_packed_world, encode_packed_world};
///
/// let body = encode_packed_world(11, 0x0301, &[9, 9]);
/// let (tag, opcode, payload) = decode_packed_world(&body).unwrap();
///
/// assert_eq!(tag, 11);
/// assert_eq!(opcode, 0x0301);
/// assert_eq!(payload, &[9, 9]);
/// ```
pub fn decode_packed_world(bytes: &[u8]) -> Result<(u8, u16, &[u8]), Error> {
    let first = *bytes.first().ok_or(Error::ShortInput)?;
    let tag = first & 0x1f;
    if !PACKED_WORLD_TAGS.contains(&tag) {
        return Err(Error::BadPackedTag(tag));
    }

    let (opcode, payload) = decode_inner(&bytes[1..])?;
    Ok((tag, opcode, payload))
}

/// The outbound counterpart of [`decode_packed_world`], used by tests.
pub fn encode_packed_world(tag: u8, opcode: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![tag & 0x1f];
    body.extend_from_slice(&encode_inner(opcode, payload));
    body
}
