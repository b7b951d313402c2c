//! Line codec: one UTF-8 line per message.
//!
//! Decodes up to the next `\n`, stripping an optional preceding `\r`;
//! encodes a message followed by `\r\n`. A stream that ends mid-line yields
//! the partial line as a final message.

use crate::protocol::{DecodeError, Decoder, Encoder};
use crate::stream::ConnStream;
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;

/// CRLF-or-LF delimited UTF-8 line codec for `String` messages.
pub struct LineCodec;

/// Strip a trailing `\n` or `\r\n` from a raw line.
fn strip_line_ending(raw: &[u8]) -> &[u8] {
    match raw {
        [head @ .., b'\r', b'\n'] => head,
        [head @ .., b'\n'] => head,
        _ => raw,
    }
}

#[async_trait]
impl Decoder<String> for LineCodec {
    async fn decode(&self, io: &ConnStream) -> Result<String, DecodeError> {
        let raw = io.read_until(b'\n').await?;
        match std::str::from_utf8(strip_line_ending(&raw)) {
            Ok(line) => Ok(line.to_string()),
            Err(_) => Err(DecodeError::Corrupt("line is not valid UTF-8".into())),
        }
    }
}

#[async_trait]
impl Encoder<String> for LineCodec {
    async fn encode(&self, msg: &String, io: &ConnStream) -> io::Result<()> {
        // Single write so a reply and a keep-alive never interleave bytes.
        let mut buf = BytesMut::with_capacity(msg.len() + 2);
        buf.extend_from_slice(msg.as_bytes());
        buf.extend_from_slice(b"\r\n");
        io.write_all(&buf).await?;
        Ok(())
    }
}
