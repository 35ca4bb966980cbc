//! Line-oriented text codecs

use super::{Codec, ParseOutcome, find_lf};
use crate::types::{Frame, ProtocolKind};

/// Comma and/or whitespace separated decimal numbers, one sample per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

/// `name:1.0,2.0,3.0` lines; the prefix up to the first colon is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct FireWaterCodec;

impl Codec for DefaultCodec {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        parse_line(buf, default_tokens)
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Default
    }
}

impl Codec for FireWaterCodec {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        parse_line(buf, |text| {
            let body = match text.split_once(':') {
                Some((_, rest)) => rest,
                None => text,
            };
            body.split(',').filter_map(parse_number).collect()
        })
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::FireWater
    }
}

/// Frame one line and hand its text to `tokenize`.
///
/// The line is always consumed, even when nothing in it parses, so a
/// malformed line never stalls the stream.
fn parse_line(buf: &[u8], tokenize: impl Fn(&str) -> Vec<f64>) -> ParseOutcome {
    let Some(lf) = find_lf(buf) else {
        return ParseOutcome::NeedMore;
    };

    let end = if lf > 0 && buf[lf - 1] == b'\r' { lf - 1 } else { lf };
    let line = &buf[..end];
    let text = String::from_utf8_lossy(line);
    let values = tokenize(&text);

    ParseOutcome::frame(Frame::TextLine { values, raw: line.to_vec() }, lf + 1)
}

/// Parse one token as a decimal number; anything else is dropped.
pub(crate) fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Tokenize text the way the default codec does.
pub(crate) fn default_tokens(text: &str) -> Vec<f64> {
    text.split(|c: char| c == ',' || c.is_whitespace()).filter_map(parse_number).collect()
}
