//! Frame encoding and incremental reassembly.
//!
//! Wire format:
//!
//! ```text
//! compact:   +--------+------------------------+
//!            | n < 80 | payload (n * 4 bytes)  |
//!            +--------+------------------------+
//!
//! extended:  +--------+-------------+----------------------------+
//!            | 0x80   | len (LE32)  | payload, zero-padded to 4  |
//!            +--------+-------------+----------------------------+
//! ```
//!
//! Endpoints with the checksum capability append a 4-byte digest
//! (first bytes of SHA-256 over header and padded payload).

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::{
    CHECKSUM_SIZE, COMPACT_HEADER_SIZE, COMPACT_MAX_WORDS, EXTENDED_HEADER_SIZE, EXTENDED_MARKER,
    MAX_PAYLOAD_SIZE, WORD_SIZE,
};

/// Receive buffers are grown on demand past this size instead of reserved upfront.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Frame encoding/decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header byte is neither a compact length nor the extended marker.
    #[error("malformed frame header byte {0:#04x}")]
    MalformedHeader(u8),

    /// Extended header declares a length with the reserved top bit set.
    #[error("malformed extended frame length {0:#010x}")]
    MalformedLength(u32),

    /// Payload exceeds the allowed size.
    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Declared or requested payload length.
        len: usize,
        /// Applicable limit.
        max: usize,
    },

    /// Trailing digest does not match the frame contents.
    #[error("frame checksum mismatch")]
    ChecksumMismatch,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// One byte holding the payload length in words.
    Compact {
        /// Payload length in 4-byte words.
        words: u8,
    },
    /// Marker byte plus explicit byte length.
    Extended {
        /// Payload length in bytes.
        len: u32,
    },
}

impl FrameHeader {
    /// Pick the smallest header able to carry `len` payload bytes.
    pub fn for_payload(len: usize) -> Result<Self, FrameError> {
        if len > MAX_PAYLOAD_SIZE {
            return Err(FrameError::TooLarge {
                len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let words = len / WORD_SIZE;
        if len % WORD_SIZE == 0 && words <= COMPACT_MAX_WORDS {
            Ok(Self::Compact { words: words as u8 })
        } else {
            Ok(Self::Extended { len: len as u32 })
        }
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>, FrameError> {
        let Some(&first) = bytes.first() else {
            return Ok(None);
        };

        if first & EXTENDED_MARKER == 0 {
            return Ok(Some(Self::Compact { words: first }));
        }
        if first != EXTENDED_MARKER {
            return Err(FrameError::MalformedHeader(first));
        }
        if bytes.len() < EXTENDED_HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if len as usize > MAX_PAYLOAD_SIZE {
            return Err(FrameError::MalformedLength(len));
        }
        Ok(Some(Self::Extended { len }))
    }

    /// Number of header bytes on the wire.
    pub fn header_len(&self) -> usize {
        match self {
            Self::Compact { .. } => COMPACT_HEADER_SIZE,
            Self::Extended { .. } => EXTENDED_HEADER_SIZE,
        }
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        match *self {
            Self::Compact { words } => words as usize * WORD_SIZE,
            Self::Extended { len } => len as usize,
        }
    }

    /// Payload length including alignment padding.
    pub fn padded_len(&self) -> usize {
        self.payload_len().div_ceil(WORD_SIZE) * WORD_SIZE
    }

    /// Total frame length on the wire.
    pub fn frame_len(&self, checksum: bool) -> usize {
        let digest = if checksum { CHECKSUM_SIZE } else { 0 };
        self.header_len() + self.padded_len() + digest
    }

    /// Append the header bytes to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Compact { words } => out.push(words),
            Self::Extended { len } => {
                out.push(EXTENDED_MARKER);
                out.extend_from_slice(&len.to_le_bytes());
            }
        }
    }
}

/// Frame `payload` for the wire.
pub fn encode_frame(payload: &[u8], checksum: bool) -> Result<Vec<u8>, FrameError> {
    let header = FrameHeader::for_payload(payload.len())?;

    let mut out = Vec::with_capacity(header.frame_len(checksum));
    header.write_to(&mut out);
    out.extend_from_slice(payload);
    out.resize(header.header_len() + header.padded_len(), 0);

    if checksum {
        let digest = frame_digest(&out, &[]);
        out.extend_from_slice(&digest);
    }

    Ok(out)
}

fn frame_digest(header: &[u8], body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let full = Sha256::new().chain_update(header).chain_update(body).finalize();
    let mut digest = [0u8; CHECKSUM_SIZE];
    digest.copy_from_slice(&full[..CHECKSUM_SIZE]);
    digest
}

/// A frame whose header is known but whose body is still arriving.
#[derive(Debug)]
struct PartialFrame {
    header: FrameHeader,
    header_bytes: [u8; EXTENDED_HEADER_SIZE],
    body: Vec<u8>,
    left: usize,
}

/// Incremental frame reassembler.
///
/// Accepts the decrypted byte stream in arbitrary chunks and yields each
/// frame once its declared length has fully arrived.
#[derive(Debug)]
pub struct FrameDecoder {
    checksum: bool,
    max_payload: usize,
    header: [u8; EXTENDED_HEADER_SIZE],
    header_read: usize,
    current: Option<PartialFrame>,
}

impl FrameDecoder {
    /// Create a decoder.
    pub fn new(checksum: bool, max_payload: usize) -> Self {
        Self {
            checksum,
            max_payload,
            header: [0u8; EXTENDED_HEADER_SIZE],
            header_read: 0,
            current: None,
        }
    }

    /// Feed `input` and push every completed payload onto `frames`.
    ///
    /// Frames completed before an error are still pushed. On error the
    /// partially received frame is discarded.
    pub fn decode(&mut self, input: &[u8], frames: &mut Vec<Vec<u8>>) -> Result<(), FrameError> {
        let result = self.decode_inner(input, frames);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn decode_inner(
        &mut self,
        mut input: &[u8],
        frames: &mut Vec<Vec<u8>>,
    ) -> Result<(), FrameError> {
        loop {
            if let Some(partial) = self.current.as_mut() {
                let take = partial.left.min(input.len());
                partial.body.extend_from_slice(&input[..take]);
                partial.left -= take;
                input = &input[take..];

                if partial.left > 0 {
                    return Ok(());
                }
                if let Some(partial) = self.current.take() {
                    frames.push(self.finish(partial)?);
                }
                continue;
            }

            if input.is_empty() {
                return Ok(());
            }

            let wanted = if self.header_read > 0 && self.header[0] == EXTENDED_MARKER {
                EXTENDED_HEADER_SIZE
            } else {
                COMPACT_HEADER_SIZE
            };
            let take = (wanted - self.header_read).min(input.len());
            self.header[self.header_read..self.header_read + take].copy_from_slice(&input[..take]);
            self.header_read += take;
            input = &input[take..];

            if let Some(header) = FrameHeader::parse(&self.header[..self.header_read])? {
                self.start(header)?;
            }
        }
    }

    fn start(&mut self, header: FrameHeader) -> Result<(), FrameError> {
        let len = header.payload_len();
        if len > self.max_payload {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_payload,
            });
        }

        let digest = if self.checksum { CHECKSUM_SIZE } else { 0 };
        let left = header.padded_len() + digest;

        self.current = Some(PartialFrame {
            header,
            header_bytes: self.header,
            body: Vec::with_capacity(left.min(PREALLOC_LIMIT)),
            left,
        });
        self.header_read = 0;
        Ok(())
    }

    fn finish(&self, partial: PartialFrame) -> Result<Vec<u8>, FrameError> {
        let PartialFrame {
            header,
            header_bytes,
            mut body,
            ..
        } = partial;
        let padded = header.padded_len();

        if self.checksum {
            let expected = frame_digest(&header_bytes[..header.header_len()], &body[..padded]);
            if body[padded..] != expected {
                return Err(FrameError::ChecksumMismatch);
            }
        }

        body.truncate(header.payload_len());
        Ok(body)
    }

    /// Drop any partially received header or body.
    pub fn reset(&mut self) {
        self.header_read = 0;
        self.current = None;
    }

    /// Whether a frame is partially received.
    pub fn is_mid_frame(&self) -> bool {
        self.header_read > 0 || self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        decoder.decode(bytes, &mut frames).unwrap();
        frames
    }

    #[test]
    fn test_compact_encoding() {
        let frame = encode_frame(&[1, 2, 3, 4], false).unwrap();
        assert_eq!(frame, [0x01, 1, 2, 3, 4]);

        let frame = encode_frame(&[], false).unwrap();
        assert_eq!(frame, [0x00]);
    }

    #[test]
    fn test_unaligned_payload_uses_extended_header() {
        let frame = encode_frame(&[1, 2, 3], false).unwrap();
        assert_eq!(frame, [0x80, 3, 0, 0, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_compact_boundary() {
        let largest_compact = vec![0xaa; COMPACT_MAX_WORDS * WORD_SIZE];
        let frame = encode_frame(&largest_compact, false).unwrap();
        assert_eq!(frame[0], 0x7f);
        assert_eq!(frame.len(), 1 + 508);

        let overflow = vec![0xaa; (COMPACT_MAX_WORDS + 1) * WORD_SIZE];
        let frame = encode_frame(&overflow, false).unwrap();
        assert_eq!(&frame[..5], &[0x80, 0x00, 0x02, 0x00, 0x00]);
        assert_eq!(frame.len(), 5 + 512);

        for payload in [largest_compact, overflow] {
            let mut decoder = FrameDecoder::new(false, usize::MAX);
            let frame = encode_frame(&payload, false).unwrap();
            assert_eq!(decode_all(&mut decoder, &frame), vec![payload]);
        }
    }

    #[test]
    fn test_header_roundtrip_across_lengths() {
        for len in [0usize, 3, 4, 508, 509, 512, 65_537, MAX_PAYLOAD_SIZE] {
            let header = FrameHeader::for_payload(len).unwrap();
            let mut bytes = Vec::new();
            header.write_to(&mut bytes);

            assert_eq!(bytes.len(), header.header_len());
            let parsed = FrameHeader::parse(&bytes).unwrap().unwrap();
            assert_eq!(parsed, header);
            assert_eq!(parsed.payload_len(), len);
        }
    }

    #[test]
    fn test_payload_over_protocol_limit() {
        let err = FrameHeader::for_payload(MAX_PAYLOAD_SIZE + 1).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));

        let err = FrameHeader::parse(&[0x80, 0x00, 0x00, 0x00, 0x80]).unwrap_err();
        assert_eq!(err, FrameError::MalformedLength(0x8000_0000));
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        let mut decoder = FrameDecoder::new(false, usize::MAX);
        for len in [0usize, 1, 2, 3, 4, 5, 100, 507, 508, 509, 510, 511, 512, 4097] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frame = encode_frame(&payload, false).unwrap();
            assert_eq!(decode_all(&mut decoder, &frame), vec![payload]);
            assert!(!decoder.is_mid_frame());
        }
    }

    #[test]
    fn test_one_byte_fragmentation() {
        let payloads = vec![vec![9u8; 12], vec![1, 2, 3], vec![], vec![7u8; 600]];
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend(encode_frame(payload, true).unwrap());
        }

        let mut decoder = FrameDecoder::new(true, usize::MAX);
        let mut frames = Vec::new();
        for byte in &stream {
            decoder.decode(std::slice::from_ref(byte), &mut frames).unwrap();
        }

        assert_eq!(frames, payloads);
    }

    #[test]
    fn test_arbitrary_split_points() {
        let payload: Vec<u8> = (0..777u32).map(|i| (i * 7) as u8).collect();
        let frame = encode_frame(&payload, false).unwrap();

        for split in 0..=frame.len() {
            let mut decoder = FrameDecoder::new(false, usize::MAX);
            let mut frames = Vec::new();
            decoder.decode(&frame[..split], &mut frames).unwrap();
            decoder.decode(&frame[split..], &mut frames).unwrap();
            assert_eq!(frames, vec![payload.clone()], "split at {split}");
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = encode_frame(&[1, 2, 3, 4, 5, 6, 7, 8], true).unwrap();
        frame[3] ^= 0xff;

        let mut decoder = FrameDecoder::new(true, usize::MAX);
        let mut frames = Vec::new();
        let err = decoder.decode(&frame, &mut frames).unwrap_err();

        assert_eq!(err, FrameError::ChecksumMismatch);
        assert!(frames.is_empty());
        assert!(!decoder.is_mid_frame());
    }

    #[test]
    fn test_malformed_header_discards_partial_state() {
        let mut decoder = FrameDecoder::new(false, usize::MAX);
        let mut frames = Vec::new();

        let err = decoder.decode(&[0x81, 0, 0, 0], &mut frames).unwrap_err();
        assert_eq!(err, FrameError::MalformedHeader(0x81));
        assert!(!decoder.is_mid_frame());

        let frame = encode_frame(&[4, 3, 2, 1], false).unwrap();
        assert_eq!(decode_all(&mut decoder, &frame), vec![vec![4, 3, 2, 1]]);
    }

    #[test]
    fn test_frames_before_error_are_kept() {
        let mut stream = encode_frame(&[1, 1, 1, 1], false).unwrap();
        stream.push(0xff);

        let mut decoder = FrameDecoder::new(false, usize::MAX);
        let mut frames = Vec::new();
        assert!(decoder.decode(&stream, &mut frames).is_err());
        assert_eq!(frames, vec![vec![1, 1, 1, 1]]);
    }

    #[test]
    fn test_decoder_size_limit() {
        let mut decoder = FrameDecoder::new(false, 1024);
        let mut frames = Vec::new();

        let err = decoder
            .decode(&[0x80, 0x01, 0x04, 0x00, 0x00], &mut frames)
            .unwrap_err();
        assert_eq!(err, FrameError::TooLarge { len: 1025, max: 1024 });
    }
}
