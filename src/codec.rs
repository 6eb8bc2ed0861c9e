// MIT License - Copyright (c) 2026 Peter Wright
// Frame codec: byte stuffing, checksum and frame (de)serialization

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::constants::{CRC_INIT, END, KIND_REQUEST, MAX_BODY_LEN, STUFF, SYNC};
use crate::error::{Result, SatelError};
use crate::protocol::Frame;

/// Satel frame checksum over the unstuffed body.
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc = CRC_INIT;
    for &b in data {
        crc = crc.rotate_left(1) ^ 0xFFFF;
        crc = crc.wrapping_add(crc >> 8).wrapping_add(u16::from(b));
    }
    crc
}

/// Encoder/decoder for Satel frames.
///
/// Encoded frames look like `FE FE <stuffed body> FE 0D`, where every `FE`
/// inside the body is sent as `FE F0`. The body is
/// `kind corr [klen key] len payload crc_hi crc_lo`; the key header is only
/// present on requests.
///
/// Decoding yields `Result<Frame>` items: a corrupt frame becomes an
/// `Err` item and the decoder resynchronizes on the next frame start, so a
/// single bad frame never ends the stream. The codec-level error is reserved
/// for I/O failures.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    key: Vec<u8>,
}

impl FrameCodec {
    pub fn new(integration_key: impl AsRef<[u8]>) -> Self {
        Self {
            key: integration_key.as_ref().to_vec(),
        }
    }

    /// Serialize a frame into `dst`.
    pub fn encode_frame(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let payload = frame.encode_payload();
        let payload_len = u8::try_from(payload.len())
            .map_err(|_| SatelError::malformed("payload longer than 255 bytes"))?;

        let mut body = Vec::with_capacity(payload.len() + self.key.len() + 6);
        body.push(frame.kind_byte());
        body.push(frame.correlation_id());
        if matches!(frame, Frame::Request { .. }) {
            let key_len = u8::try_from(self.key.len())
                .map_err(|_| SatelError::malformed("integration key too long"))?;
            body.push(key_len);
            body.extend_from_slice(&self.key);
        }
        body.push(payload_len);
        body.extend_from_slice(&payload);
        let crc = checksum(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        dst.reserve(body.len() * 2 + 4);
        dst.put_u8(SYNC);
        dst.put_u8(SYNC);
        for b in body {
            dst.put_u8(b);
            if b == SYNC {
                dst.put_u8(STUFF);
            }
        }
        dst.put_u8(SYNC);
        dst.put_u8(END);
        Ok(())
    }

    /// Parse an unstuffed body (everything between the start marker and the
    /// end marker).
    fn parse_body(&self, body: &[u8]) -> Result<Frame> {
        if body.len() < 5 {
            return Err(SatelError::malformed(format!(
                "frame body too short ({} bytes)",
                body.len()
            )));
        }
        let (content, crc_bytes) = body.split_at(body.len() - 2);
        let actual = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
        let expected = checksum(content);
        if actual != expected {
            return Err(SatelError::ChecksumMismatch { expected, actual });
        }

        let kind = content[0];
        let correlation_id = content[1];
        let mut rest = &content[2..];

        if kind == KIND_REQUEST {
            let (&key_len, tail) = rest
                .split_first()
                .ok_or_else(|| SatelError::malformed("missing key header"))?;
            let key_len = usize::from(key_len);
            if tail.len() < key_len {
                return Err(SatelError::malformed("truncated integration key"));
            }
            if tail[..key_len] != self.key[..] {
                return Err(SatelError::IntegrationKeyMismatch);
            }
            rest = &tail[key_len..];
        }

        let (&len, payload) = rest
            .split_first()
            .ok_or_else(|| SatelError::malformed("missing payload length"))?;
        if payload.len() != usize::from(len) {
            return Err(SatelError::malformed(format!(
                "payload length {} does not match declared {}",
                payload.len(),
                len
            )));
        }

        Frame::decode_payload(kind, correlation_id, payload)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = SatelError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        self.encode_frame(&item, dst)
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame>;
    type Error = SatelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Skip anything before a start marker
        let Some(mut start) = src.windows(2).position(|w| w == [SYNC, SYNC]) else {
            // A lone trailing SYNC may be the first half of a start marker
            let keep = usize::from(src.last() == Some(&SYNC));
            let discard = src.len() - keep;
            if discard > 0 {
                debug!("Discarding {} bytes outside any frame", discard);
                src.advance(discard);
            }
            return Ok(None);
        };
        // In a run of SYNC bytes only the last two form the marker; a frame
        // body never starts with SYNC
        while src.get(start + 2) == Some(&SYNC) {
            start += 1;
        }
        if start > 0 {
            debug!("Discarding {} bytes before frame start", start);
            src.advance(start);
        }

        let mut body = Vec::new();
        let mut i = 2;
        while i < src.len() {
            let b = src[i];
            if b != SYNC {
                body.push(b);
                i += 1;
            } else {
                let Some(&next) = src.get(i + 1) else {
                    break;
                };
                match next {
                    STUFF => {
                        body.push(SYNC);
                        i += 2;
                    }
                    END => {
                        src.advance(i + 2);
                        trace!("Frame body: {:02X?}", body);
                        return Ok(Some(self.parse_body(&body)));
                    }
                    SYNC => {
                        // A new frame starts before this one ended
                        src.advance(i);
                        return Ok(Some(Err(SatelError::malformed("unterminated frame"))));
                    }
                    other => {
                        src.advance(i + 2);
                        return Ok(Some(Err(SatelError::malformed(format!(
                            "invalid escape sequence FE {:02X}",
                            other
                        )))));
                    }
                }
            }
            if body.len() > MAX_BODY_LEN {
                src.advance(2);
                return Ok(Some(Err(SatelError::malformed("frame exceeds maximum length"))));
            }
        }

        // Incomplete frame, wait for more data
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None => {
                if !buf.is_empty() {
                    debug!("Dropping {} bytes of incomplete frame at EOF", buf.len());
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}
