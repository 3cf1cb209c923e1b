use bytes::{Buf, Bytes, BytesMut};
use rand::Rng;
use rand_core::RngCore;

use crate::{
    Frame, OpCode,
    error::FrameDecodeError,
    frame::{Header, MAX_CONTROL_PAYLOAD},
};

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Init,
    DecodedHeader {
        fin: bool,
        opcode: OpCode,
        masked: bool,
        length_code: u8,
        extra: usize,
        min_src_len: usize,
    },
    DecodedPayloadLength {
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload_len: usize,
        min_src_len: usize,
    },
}

/// Resumable WebSocket frame codec.
///
/// [`FramesCodec::decode`] never consumes a partial frame: bytes stay in the source
/// buffer until the whole frame is available, while the parsed header is kept in the
/// decode state so the next call resumes where the previous one stopped.
#[derive(Debug)]
pub struct FramesCodec<R = ()> {
    /// Mask outgoing frames.
    mask: bool,
    /// Refuse incoming masked frames instead of unmasking them.
    reject_masked: bool,
    max_payload_len: usize,
    decode_state: DecodeState,
    rng: R,
}

impl<R> FramesCodec<R> {
    pub const fn new(rng: R) -> Self {
        Self {
            mask: false,
            reject_masked: false,
            max_payload_len: usize::MAX,
            decode_state: DecodeState::Init,
            rng,
        }
    }

    /// A codec for the client side of a connection.
    ///
    /// Outgoing frames are masked, incoming masked frames are a protocol violation.
    pub const fn client(rng: R) -> Self {
        let mut codec = Self::new(rng);

        codec.mask = true;
        codec.reject_masked = true;
        codec
    }

    pub const fn set_mask(&mut self, mask: bool) {
        self.mask = mask;
    }

    pub const fn set_reject_masked(&mut self, reject_masked: bool) {
        self.reject_masked = reject_masked;
    }

    pub const fn with_max_payload_len(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Decodes the next frame from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A decoded frame is removed from `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameDecodeError> {
        const MIN_HEADER_SIZE: usize = 2;

        loop {
            match self.decode_state {
                DecodeState::Init => {
                    if src.len() < MIN_HEADER_SIZE {
                        return Ok(None);
                    }

                    let fin = src[0] & 0b10000000 != 0;

                    if src[0] & 0b01110000 != 0 {
                        return Err(FrameDecodeError::ReservedBitsNotZero);
                    }

                    let opcode = OpCode::try_from(src[0] & 0b00001111)?;
                    let masked = src[1] & 0b10000000 != 0;

                    if masked && self.reject_masked {
                        return Err(FrameDecodeError::MaskedServerFrame);
                    }

                    let length_code = src[1] & 0x7F;
                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };

                    if opcode.is_control() && !fin {
                        return Err(FrameDecodeError::ControlFrameFragmented);
                    }

                    let min_src_len = MIN_HEADER_SIZE + extra + masked as usize * 4;

                    self.decode_state = DecodeState::DecodedHeader {
                        fin,
                        opcode,
                        masked,
                        length_code,
                        extra,
                        min_src_len,
                    };
                }
                DecodeState::DecodedHeader {
                    fin,
                    opcode,
                    masked,
                    length_code,
                    extra,
                    min_src_len,
                } => {
                    if src.len() < min_src_len {
                        return Ok(None);
                    }

                    let payload_len = match extra {
                        0 => length_code as u64,
                        2 => u16::from_be_bytes([src[2], src[3]]) as u64,
                        _ => {
                            let len = u64::from_be_bytes([
                                src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
                            ]);

                            if len & (1 << 63) != 0 {
                                return Err(FrameDecodeError::PayloadLengthHighBitSet);
                            }

                            len
                        }
                    };

                    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
                        return Err(FrameDecodeError::ControlFrameTooLarge { len: payload_len });
                    }

                    let payload_len = usize::try_from(payload_len)
                        .ok()
                        .filter(|len| *len <= self.max_payload_len)
                        .ok_or(FrameDecodeError::PayloadTooLarge {
                            len: payload_len,
                            max: self.max_payload_len,
                        })?;

                    let mask = masked.then(|| {
                        [
                            src[2 + extra],
                            src[3 + extra],
                            src[4 + extra],
                            src[5 + extra],
                        ]
                    });

                    self.decode_state = DecodeState::DecodedPayloadLength {
                        fin,
                        opcode,
                        mask,
                        payload_len,
                        min_src_len: min_src_len + payload_len,
                    };
                }
                DecodeState::DecodedPayloadLength {
                    fin,
                    opcode,
                    mask,
                    payload_len,
                    min_src_len,
                } => {
                    if src.len() < min_src_len {
                        src.reserve(min_src_len - src.len());

                        return Ok(None);
                    }

                    src.advance(min_src_len - payload_len);

                    let mut payload = src.split_to(payload_len);

                    if let Some(mask) = mask {
                        crate::mask::unmask(&mut payload, mask);
                    }

                    self.decode_state = DecodeState::Init;

                    let frame = Frame::new(fin, opcode, payload.freeze());

                    tracing::trace!(
                        fin,
                        opcode = ?frame.opcode(),
                        len = frame.payload().len(),
                        "Decoded frame"
                    );

                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl<R: RngCore> FramesCodec<R> {
    /// Appends `frame` to `dst`, masked with a fresh random key if masking is enabled.
    pub fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) {
        let mask: Option<[u8; 4]> = self.mask.then(|| self.rng.random());

        let payload = frame.payload();
        let header = Header::new(frame.is_final(), frame.opcode(), mask, payload.len() as u64);

        dst.reserve(header.encoded_len() + payload.len());

        header.write(dst);

        let start = dst.len();

        dst.extend_from_slice(payload);

        if let Some(mask) = mask {
            crate::mask::unmask(&mut dst[start..], mask);
        }

        tracing::trace!(
            fin = frame.is_final(),
            opcode = ?frame.opcode(),
            len = payload.len(),
            "Encoded frame"
        );
    }
}

/// Encodes a single frame.
///
/// Masked frames use a fresh key drawn from the thread-local CSPRNG.
pub fn encode(opcode: OpCode, payload: &[u8], fin: bool, masked: bool) -> Bytes {
    let mut codec = FramesCodec::new(rand::rng());
    codec.set_mask(masked);

    let mut dst = BytesMut::new();
    codec.encode(&Frame::new(fin, opcode, Bytes::copy_from_slice(payload)), &mut dst);

    dst.freeze()
}

/// Decodes a single frame from the start of `src`.
///
/// Returns the frame, or `None` if `src` holds only part of one, together with the
/// number of bytes consumed. Masked frames are unmasked.
pub fn decode(src: &[u8]) -> Result<(Option<Frame>, usize), FrameDecodeError> {
    let mut codec = FramesCodec::new(());
    let mut buf = BytesMut::from(src);

    let frame = codec.decode(&mut buf)?;

    Ok((frame, src.len() - buf.len()))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn client() -> FramesCodec<StdRng> {
        FramesCodec::client(StdRng::from_os_rng())
    }

    fn decode_all(codec: &mut FramesCodec<StdRng>, src: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();

        while let Some(frame) = codec.decode(src).unwrap() {
            frames.push(frame);
        }

        frames
    }

    fn server_stream() -> Vec<u8> {
        let mut server = FramesCodec::new(StdRng::from_os_rng());
        let mut dst = BytesMut::new();

        for frame in [
            Frame::text("Hello"),
            Frame::new(false, OpCode::Binary, vec![7u8; 300]),
            Frame::ping(&b"keepalive"[..]),
            Frame::new(true, OpCode::Continuation, vec![9u8; 70_000]),
            Frame::close(None),
        ] {
            server.encode(&frame, &mut dst);
        }

        dst.to_vec()
    }

    mod decode {
        use super::*;

        #[test]
        fn reserved_bits_not_zero() {
            let mut src = BytesMut::from(&[0b11110001u8, 0b00000000][..]);

            let error = client().decode(&mut src).unwrap_err();

            assert!(matches!(error, FrameDecodeError::ReservedBitsNotZero));
        }

        #[test]
        fn invalid_opcode() {
            let mut src = BytesMut::from(&[0b00001111u8, 0b00000000][..]);

            let error = client().decode(&mut src).unwrap_err();

            assert!(matches!(error, FrameDecodeError::InvalidOpCode { opcode: 0xF }));
        }

        #[test]
        fn masked_server_frame() {
            let mut src = BytesMut::from(&[0x81u8, 0x81, 1, 2, 3, 4, b'a' ^ 1][..]);

            let error = client().decode(&mut src).unwrap_err();

            assert!(matches!(error, FrameDecodeError::MaskedServerFrame));
        }

        #[test]
        fn control_frame_fragmented() {
            let mut src = BytesMut::from(&[0x09u8, 0x00][..]);

            let error = client().decode(&mut src).unwrap_err();

            assert!(matches!(error, FrameDecodeError::ControlFrameFragmented));
        }

        #[test]
        fn control_frame_too_large() {
            for opcode in [0x88u8, 0x89, 0x8A] {
                let mut src = BytesMut::from(&[opcode, 126, 0x00, 0x7E][..]);

                let error = client().decode(&mut src).unwrap_err();

                assert!(matches!(
                    error,
                    FrameDecodeError::ControlFrameTooLarge { len: 126 }
                ));
            }
        }

        #[test]
        fn length_high_bit_set() {
            let mut src = BytesMut::from(&[0x82u8, 127, 0x80, 0, 0, 0, 0, 0, 0, 1][..]);

            let error = client().decode(&mut src).unwrap_err();

            assert!(matches!(error, FrameDecodeError::PayloadLengthHighBitSet));
        }

        #[test]
        fn payload_too_large() {
            let mut src = BytesMut::from(&[0x82u8, 126, 0x01, 0x00][..]);

            let error = client()
                .with_max_payload_len(255)
                .decode(&mut src)
                .unwrap_err();

            assert!(matches!(
                error,
                FrameDecodeError::PayloadTooLarge { len: 256, max: 255 }
            ));
        }

        #[test]
        fn need_more_data_consumes_nothing() {
            let mut src = BytesMut::from(&[0x81u8, 0x05, b'H', b'e'][..]);

            assert!(client().decode(&mut src).unwrap().is_none());
            assert_eq!(src.len(), 4);
        }

        #[test]
        fn one_byte_at_a_time() {
            let stream = server_stream();

            let mut whole = BytesMut::from(&stream[..]);
            let expected = decode_all(&mut client(), &mut whole);

            assert_eq!(expected.len(), 5);
            assert!(whole.is_empty());

            let mut codec = client();
            let mut src = BytesMut::new();
            let mut frames = Vec::new();

            for byte in stream {
                src.extend_from_slice(&[byte]);
                frames.extend(decode_all(&mut codec, &mut src));
            }

            assert_eq!(frames, expected);
        }

        #[test]
        fn arbitrary_chunks() {
            let stream = server_stream();

            let mut whole = BytesMut::from(&stream[..]);
            let expected = decode_all(&mut client(), &mut whole);

            for chunk_size in [2, 3, 7, 125, 126, 4096, stream.len()] {
                let mut codec = client();
                let mut src = BytesMut::new();
                let mut frames = Vec::new();

                for chunk in stream.chunks(chunk_size) {
                    src.extend_from_slice(chunk);
                    frames.extend(decode_all(&mut codec, &mut src));
                }

                assert_eq!(frames, expected, "chunk size {chunk_size}");
            }
        }
    }

    mod encode {
        use super::*;

        #[test]
        fn client_frames_are_masked() {
            let mut dst = BytesMut::new();

            client().encode(&Frame::text("Hello"), &mut dst);

            assert_eq!(dst[0], 0x81);
            assert_eq!(dst[1], 0x80 | 5);
            assert_eq!(dst.len(), 2 + 4 + 5);

            let mask = [dst[2], dst[3], dst[4], dst[5]];
            let mut payload = dst[6..].to_vec();
            crate::mask::unmask(&mut payload, mask);

            assert_eq!(payload, b"Hello");
        }

        #[test]
        fn keys_differ_between_frames() {
            let mut codec = client();
            let mut keys = std::collections::HashSet::new();

            for _ in 0..16 {
                let mut dst = BytesMut::new();
                codec.encode(&Frame::binary(&b"x"[..]), &mut dst);
                keys.insert([dst[2], dst[3], dst[4], dst[5]]);
            }

            assert!(keys.len() > 1);
        }

        #[test]
        fn round_trip_boundary_lengths() {
            for len in [0usize, 125, 126, 65535, 65536] {
                let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();

                let encoded = encode(OpCode::Binary, &payload, true, true);
                let (frame, consumed) = decode(&encoded).unwrap();
                let frame = frame.unwrap();

                assert_eq!(consumed, encoded.len());
                assert_eq!(frame.opcode(), OpCode::Binary);
                assert!(frame.is_final());
                assert_eq!(frame.payload().as_ref(), &payload[..], "length {len}");
            }
        }

        #[test]
        fn partial_decode_reports_nothing_consumed() {
            let encoded = encode(OpCode::Text, b"partial", true, false);

            let (frame, consumed) = decode(&encoded[..encoded.len() - 1]).unwrap();

            assert!(frame.is_none());
            assert_eq!(consumed, 0);
        }
    }
}
