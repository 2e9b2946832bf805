//! # STOMP 1.2 Codec
//!
//! Frame boundaries follow the 1.2 wire rules:
//! - lines end with `\n` or `\r\n`;
//! - bare EOLs between frames are heart-beats and are skipped;
//! - with `content-length` the body is exactly that many octets (and may
//!   contain NUL), otherwise it runs to the first NUL;
//! - header names and values are escaped (`\\`, `\n`, `\r`, `\c`) except in
//!   `CONNECT`, `STOMP` and `CONNECTED` frames.

use bytes::{Buf, BufMut, BytesMut};
use std::borrow::Cow;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BrokerError;
use crate::frame::{Command, Frame};

/// Largest frame the decoder buffers before giving up.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encoder/decoder for STOMP frames.
#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_size: usize,
}

impl StompCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    fn incomplete(&self, src: &BytesMut) -> Result<Option<Frame>, BrokerError> {
        if src.len() > self.max_frame_size {
            return Err(BrokerError::FrameTooLarge {
                max: self.max_frame_size,
            });
        }
        Ok(None)
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, BrokerError> {
        skip_heartbeats(src);
        if src.is_empty() {
            return Ok(None);
        }

        let Some((header_end, body_start)) = find_header_end(src) else {
            return self.incomplete(src);
        };

        let head = std::str::from_utf8(&src[..header_end])
            .map_err(|_| BrokerError::InvalidFrame("headers are not valid UTF-8".into()))?;
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line).ok_or_else(|| {
            BrokerError::InvalidFrame(format!("unknown command '{command_line}'"))
        })?;

        let mut frame = Frame::new(command);
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                BrokerError::InvalidFrame(format!("malformed header line '{line}'"))
            })?;
            if command.escapes_headers() {
                frame.push_header(unescape(name)?, unescape(value)?);
            } else {
                frame.push_header(name.to_string(), value.to_string());
            }
        }

        let body_len = match frame.get("content-length") {
            Some(raw) => {
                let len: usize = raw.trim().parse().map_err(|_| {
                    BrokerError::InvalidFrame(format!("invalid content-length '{raw}'"))
                })?;
                let frame_len = body_start
                    .checked_add(len)
                    .and_then(|n| n.checked_add(1))
                    .filter(|n| *n <= self.max_frame_size)
                    .ok_or(BrokerError::FrameTooLarge {
                        max: self.max_frame_size,
                    })?;
                if src.len() < frame_len {
                    src.reserve(frame_len - src.len());
                    return Ok(None);
                }
                if src[body_start + len] != 0 {
                    return Err(BrokerError::InvalidFrame(
                        "body not terminated by NUL".into(),
                    ));
                }
                len
            }
            None => match src[body_start..].iter().position(|b| *b == 0) {
                Some(len) => len,
                None => return self.incomplete(src),
            },
        };

        let mut data = src.split_to(body_start + body_len + 1);
        data.advance(body_start);
        data.truncate(body_len);
        frame.body = data.freeze();

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = BrokerError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), BrokerError> {
        let escape_headers = frame.command.escapes_headers();
        let mut has_length = false;

        dst.reserve(frame.body.len() + 64);
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        for (name, value) in frame.headers() {
            has_length |= name == "content-length";
            if escape_headers {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        if !has_length && !frame.body.is_empty() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }

        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

fn skip_heartbeats(src: &mut BytesMut) {
    loop {
        if src.starts_with(b"\r\n") {
            src.advance(2);
        } else if src.starts_with(b"\n") {
            src.advance(1);
        } else {
            return;
        }
    }
}

/// Position of the last header line's EOL and of the first body octet.
fn find_header_end(src: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = src[from..].iter().position(|b| *b == b'\n') {
        let eol = from + offset;
        let rest = &src[eol + 1..];
        if rest.starts_with(b"\n") {
            return Some((eol, eol + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((eol, eol + 3));
        }
        from = eol + 1;
    }
    None
}

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['\\', '\n', '\r', ':']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn unescape(raw: &str) -> Result<String, BrokerError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(BrokerError::InvalidFrame(format!(
                    "invalid header escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<Frame>, BrokerError> {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn encode(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        StompCodec::new().encode(frame, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_decode_simple_frame() {
        let frames = decode_all(b"MESSAGE\ndestination:/queue/a\nmessage-id:1\n\nhello\0").unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("destination"), Some("/queue/a"));
        assert_eq!(&frames[0].body[..], b"hello");
    }

    #[test]
    fn test_decode_skips_heartbeats() {
        let frames = decode_all(b"\n\r\n\nRECEIPT\nreceipt-id:r-1\n\n\0\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get("receipt-id"), Some("r-1"));
    }

    #[test]
    fn test_decode_crlf_lines() {
        let frames = decode_all(b"CONNECTED\r\nversion:1.2\r\n\r\n\0").unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].get("version"), Some("1.2"));
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&b"MESSAGE\nmessage-id:7\n\npart"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ial\0");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"partial");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_content_length_body_with_nul() {
        let frames = decode_all(b"MESSAGE\ncontent-length:5\n\nab\0cd\0").unwrap();
        assert_eq!(&frames[0].body[..], b"ab\0cd");
    }

    #[test]
    fn test_decode_content_length_waits_for_body() {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:10\n\nabc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_content_length_without_nul() {
        let result = decode_all(b"MESSAGE\ncontent-length:2\n\nabc\0");
        assert!(matches!(result, Err(BrokerError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_two_frames() {
        let frames = decode_all(b"RECEIPT\nreceipt-id:1\n\n\0RECEIPT\nreceipt-id:2\n\n\0").unwrap();
        let ids: Vec<_> = frames.iter().filter_map(|f| f.get("receipt-id")).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_decode_unescapes_headers() {
        let frames = decode_all(b"MESSAGE\nkey\\cname:line\\nbreak\\\\\n\n\0").unwrap();
        assert_eq!(frames[0].get("key:name"), Some("line\nbreak\\"));
    }

    #[test]
    fn test_decode_connected_headers_are_raw() {
        let frames = decode_all(b"CONNECTED\nserver:broker\\c1\n\n\0").unwrap();
        assert_eq!(frames[0].get("server"), Some("broker\\c1"));
    }

    #[test]
    fn test_decode_invalid_escape() {
        let result = decode_all(b"MESSAGE\nbad:\\t\n\n\0");
        assert!(matches!(result, Err(BrokerError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_unknown_command() {
        let result = decode_all(b"PUBLISH\n\n\0");
        assert!(matches!(result, Err(BrokerError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = StompCodec::with_max_frame_size(16);
        let mut buf = BytesMut::from(&b"MESSAGE\nmessage-id:1\n\nthis body never ends"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BrokerError::FrameTooLarge { max: 16 })
        ));
    }

    #[test]
    fn test_decode_rejects_overflowing_content_length() {
        let result = decode_all(b"MESSAGE\ncontent-length:18446744073709551615\n\nabc\0");
        assert!(matches!(result, Err(BrokerError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_content_length_over_limit() {
        let mut codec = StompCodec::with_max_frame_size(64);
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:1000\n\nabc"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BrokerError::FrameTooLarge { max: 64 })
        ));
    }

    #[test]
    fn test_encode_adds_content_length() {
        let bytes = encode(
            Frame::new(Command::Send)
                .header("destination", "outbound")
                .body("hello"),
        );
        assert_eq!(
            bytes,
            b"SEND\ndestination:outbound\ncontent-length:5\n\nhello\0".to_vec()
        );
    }

    #[test]
    fn test_encode_empty_body() {
        let bytes = encode(Frame::new(Command::Begin).header("transaction", "tx-1"));
        assert_eq!(bytes, b"BEGIN\ntransaction:tx-1\n\n\0".to_vec());
    }

    #[test]
    fn test_encode_escapes_headers() {
        let bytes = encode(Frame::new(Command::Send).header("note", "a:b\nc"));
        assert_eq!(bytes, b"SEND\nnote:a\\cb\\nc\n\n\0".to_vec());
    }

    #[test]
    fn test_encode_connect_headers_raw() {
        let bytes = encode(Frame::new(Command::Connect).header("host", "vhost:1"));
        assert_eq!(bytes, b"CONNECT\nhost:vhost:1\n\n\0".to_vec());
    }

    #[test]
    fn test_encoded_frame_decodes() {
        let original = Frame::new(Command::Send)
            .header("destination", "queue:inbound")
            .header("transaction", "tx-9")
            .body("<Envelope/>");
        let decoded = decode_all(&encode(original.clone())).unwrap();

        assert_eq!(decoded[0].get("destination"), Some("queue:inbound"));
        assert_eq!(decoded[0].get("content-length"), Some("11"));
        assert_eq!(decoded[0].body, original.body);
    }
}
