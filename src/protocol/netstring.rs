//! Length-Prefixed Framing
//!
//! Every request and response is a single frame:
//!
//! ```text
//! <decimal length>:<payload bytes>
//!
//! 9:get hello
//! 2:OK
//! ```
//!
//! This is netstring-like but deliberately has **no** trailing comma after the
//! payload. Existing clients depend on that, so the codec must not add or
//! expect one.
//!
//! ## How the Parser Works
//!
//! Like the rest of the I/O path, parsing is incremental. [`parse_frame`]
//! returns either:
//! - `Ok(Some((payload, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, wait for more data
//! - `Err(FrameError)` - the length prefix is malformed; the connection
//!   should be dropped because there is no way to resynchronize

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest payload accepted in a single frame (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Longest length prefix accepted, in digits
const MAX_LENGTH_DIGITS: usize = 20;

/// Separator between the length prefix and the payload
const SEPARATOR: u8 = b':';

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame starts with the separator
    #[error("missing length prefix")]
    EmptyLength,

    /// Something other than a decimal digit before the separator
    #[error("invalid byte in length prefix: {0:#04x}")]
    InvalidLengthByte(u8),

    /// The length prefix has more digits than any sane length
    #[error("length prefix longer than 20 digits")]
    LengthTooLong,

    /// The declared payload length exceeds the limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Result type for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Attempts to decode one frame from the front of `buf`.
///
/// # Example
///
/// ```
/// use kvstore::protocol::parse_frame;
///
/// let (payload, consumed) = parse_frame(b"5:hello6:world!").unwrap().unwrap();
/// assert_eq!(&payload[..], b"hello");
/// assert_eq!(consumed, 7);
///
/// assert!(parse_frame(b"5:hel").unwrap().is_none());
/// ```
pub fn parse_frame(buf: &[u8]) -> FrameResult<Option<(Bytes, usize)>> {
    let Some(separator) = find_separator(buf)? else {
        return Ok(None);
    };

    let length = parse_length(&buf[..separator])?;

    let start = separator + 1;
    let end = start + length;
    if buf.len() < end {
        return Ok(None);
    }

    Ok(Some((Bytes::copy_from_slice(&buf[start..end]), end)))
}

/// Encodes `payload` as a frame.
///
/// # Example
///
/// ```
/// use kvstore::protocol::encode_frame;
///
/// assert_eq!(&encode_frame(b"OK")[..], b"2:OK");
/// ```
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + MAX_LENGTH_DIGITS + 1);
    encode_frame_into(payload, &mut buf);
    buf.freeze()
}

/// Appends an encoded frame to `buf`.
pub fn encode_frame_into(payload: &[u8], buf: &mut BytesMut) {
    buf.put_slice(payload.len().to_string().as_bytes());
    buf.put_u8(SEPARATOR);
    buf.put_slice(payload);
}

/// Finds the separator, validating the prefix bytes seen so far.
fn find_separator(buf: &[u8]) -> FrameResult<Option<usize>> {
    for (i, &byte) in buf.iter().enumerate() {
        if byte == SEPARATOR {
            return if i == 0 {
                Err(FrameError::EmptyLength)
            } else {
                Ok(Some(i))
            };
        }
        if !byte.is_ascii_digit() {
            return Err(FrameError::InvalidLengthByte(byte));
        }
        if i >= MAX_LENGTH_DIGITS {
            return Err(FrameError::LengthTooLong);
        }
    }

    Ok(None)
}

fn parse_length(digits: &[u8]) -> FrameResult<usize> {
    let too_large = |size| FrameError::FrameTooLarge {
        size,
        max: MAX_FRAME_SIZE,
    };

    let mut length: usize = 0;
    for &digit in digits {
        length = length
            .checked_mul(10)
            .and_then(|n| n.checked_add(usize::from(digit - b'0')))
            .ok_or_else(|| too_large(usize::MAX))?;
    }

    if length > MAX_FRAME_SIZE {
        return Err(too_large(length));
    }

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_frame() {
        let (payload, consumed) = parse_frame(b"5:hello").unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_no_trailing_delimiter() {
        // A comma after the payload belongs to the next frame, which is then malformed
        let (payload, consumed) = parse_frame(b"2:OK,").unwrap().unwrap();
        assert_eq!(&payload[..], b"OK");
        assert_eq!(consumed, 4);
        assert_eq!(parse_frame(b","), Err(FrameError::InvalidLengthByte(b',')));
    }

    #[test]
    fn test_incomplete_frames() {
        assert_eq!(parse_frame(b""), Ok(None));
        assert_eq!(parse_frame(b"12"), Ok(None));
        assert_eq!(parse_frame(b"5:"), Ok(None));
        assert_eq!(parse_frame(b"5:hel"), Ok(None));
    }

    #[test]
    fn test_empty_payload() {
        let (payload, consumed) = parse_frame(b"0:").unwrap().unwrap();
        assert!(payload.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_pipelined_frames() {
        let buf = b"3:get3:set";
        let (first, consumed) = parse_frame(buf).unwrap().unwrap();
        let (second, _) = parse_frame(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(&first[..], b"get");
        assert_eq!(&second[..], b"set");
    }

    #[test]
    fn test_malformed_prefix() {
        assert_eq!(parse_frame(b":abc"), Err(FrameError::EmptyLength));
        assert_eq!(parse_frame(b"x:"), Err(FrameError::InvalidLengthByte(b'x')));
        assert_eq!(parse_frame(b"1-2:ab"), Err(FrameError::InvalidLengthByte(b'-')));
        assert_eq!(parse_frame(&[b'9'; 25]), Err(FrameError::LengthTooLong));
    }

    #[test]
    fn test_frame_too_large() {
        let prefix = format!("{}:", MAX_FRAME_SIZE + 1);
        assert!(matches!(
            parse_frame(prefix.as_bytes()),
            Err(FrameError::FrameTooLarge { .. })
        ));

        assert!(matches!(
            parse_frame(b"99999999999999999999:"),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode() {
        assert_eq!(&encode_frame(b"OK")[..], b"2:OK");
        assert_eq!(&encode_frame(b"")[..], b"0:");

        let mut buf = BytesMut::new();
        encode_frame_into(b"ab", &mut buf);
        encode_frame_into(b"cde", &mut buf);
        assert_eq!(&buf[..], b"2:ab3:cde");
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        let encoded = encode_frame("héllo".as_bytes());
        assert_eq!(&encoded[..], "6:héllo".as_bytes());

        let (payload, _) = parse_frame(&encoded).unwrap().unwrap();
        assert_eq!(std::str::from_utf8(&payload).unwrap(), "héllo");
    }
}
