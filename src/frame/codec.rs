//! Length-prefixed wire codec
//!
//! Each frame travels as a 4-byte big-endian length followed by the frame
//! bytes, untouched.

use bytes::{Buf, BufMut, BytesMut};

use super::Frame;

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared length exceeds the configured maximum
    TooLarge { len: usize, max: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {}", len, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Largest frame the length prefix can describe
pub const MAX_WIRE_LEN: usize = u32::MAX as usize;

/// Append the encoded frame to `dst`
///
/// Fails without touching `dst` if the frame does not fit the length prefix.
pub fn encode(frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
    let len = u32::try_from(frame.len()).map_err(|_| FrameError::TooLarge {
        len: frame.len(),
        max: MAX_WIRE_LEN,
    })?;
    dst.reserve(LENGTH_PREFIX_LEN + frame.len());
    dst.put_u32(len);
    dst.put_slice(frame.as_bytes());
    Ok(())
}

/// Whether `src` holds at least one complete frame
pub fn has_frame(src: &[u8]) -> bool {
    if src.len() < LENGTH_PREFIX_LEN {
        return false;
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    src.len() >= LENGTH_PREFIX_LEN + len
}

/// Split one frame off the front of `src`
///
/// Returns `Ok(None)` when more bytes are needed. The returned frame shares
/// the buffer's allocation.
pub fn decode(src: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, FrameError> {
    if src.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    if src.len() < LENGTH_PREFIX_LEN + len {
        src.reserve(LENGTH_PREFIX_LEN + len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_LEN);
    Ok(Some(Frame::from_bytes(src.split_to(len).freeze())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_needs_full_frame() {
        let mut buf = BytesMut::new();
        encode(&Frame::new("gps", "payload"), &mut buf).unwrap();
        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(!has_frame(&partial));
        assert_eq!(decode(&mut partial, DEFAULT_MAX_FRAME_LEN), Ok(None));

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert!(has_frame(&partial));
        let frame = decode(&mut partial, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"gps payload");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut buf = BytesMut::new();
        encode(&Frame::new("camara", "1"), &mut buf).unwrap();
        encode(&Frame::new("espira", "2"), &mut buf).unwrap();

        let first = decode(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
        let second = decode(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(first.topic(), b"camara");
        assert_eq!(second.topic(), b"espira");
        assert_eq!(decode(&mut buf, DEFAULT_MAX_FRAME_LEN), Ok(None));
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let mut buf = BytesMut::new();
        encode(&Frame::from_bytes(vec![b'x'; 64]), &mut buf).unwrap();

        assert_eq!(
            decode(&mut buf, 16),
            Err(FrameError::TooLarge { len: 64, max: 16 })
        );
    }

    #[test]
    fn test_encode_writes_exact_prefix() {
        let mut buf = BytesMut::new();
        encode(&Frame::from_bytes(vec![b'y'; 300]), &mut buf).unwrap();

        assert_eq!(&buf[..LENGTH_PREFIX_LEN], &300u32.to_be_bytes());
        assert_eq!(buf.len(), LENGTH_PREFIX_LEN + 300);
        assert_eq!(MAX_WIRE_LEN, u32::MAX as usize);
    }

    #[test]
    fn test_empty_frame() {
        let mut buf = BytesMut::new();
        encode(&Frame::from_bytes(Vec::new()), &mut buf).unwrap();
        assert_eq!(buf.len(), LENGTH_PREFIX_LEN);

        let frame = decode(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
        assert!(frame.is_empty());
    }
}
