//! Sandboxed user-supplied parser
//!
//! User parsers are Rhai scripts defining `fn parse(bytes)`. The script receives
//! the buffered bytes as a blob and returns a map:
//!
//! ```text
//! fn parse(bytes) {
//!     let nl = bytes.find_byte(10);
//!     if nl < 0 { return #{ values: (), frameByteLength: 0 }; }
//!     #{ values: parse_numbers(bytes, 0, nl), frameByteLength: nl + 1 }
//! }
//! ```
//!
//! `frameByteLength == 0` asks for more data. `values` may be `()` to consume a
//! frame without producing a sample.
//!
//! The engine has no module resolver, no `eval`, and bounded operations, call
//! depth, and collection sizes, so a script can neither reach the host nor
//! hang the worker.

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Array, Blob, CallFnOptions, Dynamic, Engine, FLOAT, INT, Map, Scope};
use tracing::{debug, trace};

use super::text::default_tokens;
use super::{Codec, ParseOutcome, find_lf};
use crate::types::{Frame, ProtocolKind, UnidentifiedReason};
use crate::{AresplotError, Result};

/// Bytes every user parser is run against before activation.
pub const PROBE_INPUT: &[u8] = b"1,2\n";

const PARSE_FN: &str = "parse";
const MAX_OPERATIONS: u64 = 200_000;
const MAX_CALL_LEVELS: usize = 16;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 64 * 1024;
const MAX_ARRAY_SIZE: usize = 4096;
const MAX_MAP_SIZE: usize = 64;

/// A compiled user parser.
pub struct UserCodec {
    engine: Engine,
    ast: AST,
}

impl std::fmt::Debug for UserCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCodec").field("functions", &self.ast.iter_functions().count()).finish()
    }
}

/// Shape violations and script errors, rendered for the user.
type Fault = String;

impl UserCodec {
    /// Compile `source` in a fresh sandboxed engine.
    ///
    /// Fails if the script does not parse or does not define `parse(bytes)`.
    pub fn compile(source: &str) -> Result<Self> {
        let engine = sandboxed_engine();
        let ast = engine.compile(source).map_err(|e| AresplotError::user_parser(format!("syntax error: {}", e)))?;

        let has_entry = ast.iter_functions().any(|f| f.name == PARSE_FN && f.params.len() == 1);
        if !has_entry {
            return Err(AresplotError::user_parser("script must define `fn parse(bytes)`"));
        }

        debug!("User parser compiled");
        Ok(Self { engine, ast })
    }

    /// Run the parser once against [`PROBE_INPUT`].
    ///
    /// A parser that throws, returns the wrong shape, or claims more bytes than
    /// it was given is rejected before it can see real data.
    pub fn probe(&self) -> Result<()> {
        match self.interpret(PROBE_INPUT) {
            Ok(_) => Ok(()),
            Err(fault) => Err(AresplotError::user_parser(format!("probe with \"1,2\\n\" failed: {}", fault))),
        }
    }

    fn interpret(&self, buf: &[u8]) -> std::result::Result<Option<(Vec<f64>, usize)>, Fault> {
        let options = CallFnOptions::new().eval_ast(false);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut Scope::new(),
                &self.ast,
                PARSE_FN,
                (Dynamic::from_blob(buf.to_vec()),),
            )
            .map_err(|e| e.to_string())?;

        let map = result.try_cast::<Map>().ok_or_else(|| "parse must return an object map".to_string())?;

        let length = map
            .get("frameByteLength")
            .ok_or_else(|| "missing frameByteLength".to_string())?
            .as_int()
            .map_err(|t| format!("frameByteLength must be an integer, got {}", t))?;
        if length < 0 || length as usize > buf.len() {
            return Err(format!("frameByteLength {} outside 0..={}", length, buf.len()));
        }
        if length == 0 {
            return Ok(None);
        }

        let values = match map.get("values") {
            None => Vec::new(),
            Some(v) if v.is_unit() => Vec::new(),
            Some(v) => {
                let array = v.clone().try_cast::<Array>().ok_or_else(|| "values must be an array or ()".to_string())?;
                array.iter().map(number).collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        Ok(Some((values, length as usize)))
    }
}

impl Codec for UserCodec {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        if buf.is_empty() {
            return ParseOutcome::NeedMore;
        }

        match self.interpret(buf) {
            Ok(None) => ParseOutcome::NeedMore,
            Ok(Some((values, consumed))) => {
                trace!(consumed, values = values.len(), "User parser frame");
                ParseOutcome::frame(Frame::Custom { values, raw: buf[..consumed].to_vec() }, consumed)
            }
            Err(fault) => {
                // Skip one line (or everything) so a faulting script cannot stall the stream
                let consumed = find_lf(buf).map_or(buf.len(), |lf| lf + 1);
                debug!(consumed, "User parser fault: {}", fault);
                ParseOutcome::frame(
                    Frame::unidentified(&buf[..consumed], UnidentifiedReason::UserParserFault(fault)),
                    consumed,
                )
            }
        }
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Custom
    }
}

fn number(value: &Dynamic) -> std::result::Result<f64, Fault> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    value.as_int().map(|i| i as f64).map_err(|t| format!("values must be numbers, got {}", t))
}

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();

    engine
        .set_max_operations(MAX_OPERATIONS)
        .set_max_call_levels(MAX_CALL_LEVELS)
        .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH)
        .set_max_string_size(MAX_STRING_SIZE)
        .set_max_array_size(MAX_ARRAY_SIZE)
        .set_max_map_size(MAX_MAP_SIZE)
        .set_max_modules(0)
        .set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.on_print(|text| debug!(target: "aresplot::user_parser", "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "aresplot::user_parser", source = source.unwrap_or(""), %pos, "{}", text)
    });

    register_helpers(&mut engine);
    engine
}

/// Byte helpers exposed to scripts. Out-of-range reads return zero.
fn register_helpers(engine: &mut Engine) {
    engine.register_fn("find_byte", |blob: &mut Blob, byte: INT| -> INT { find_from(blob, byte, 0) });
    engine.register_fn("find_byte", |blob: &mut Blob, byte: INT, start: INT| -> INT { find_from(blob, byte, start) });

    engine.register_fn("read_u8", |blob: &mut Blob, at: INT| -> INT { read::<1>(blob, at).map_or(0, |b| b[0] as INT) });
    engine.register_fn("read_u16le", |blob: &mut Blob, at: INT| -> INT {
        read::<2>(blob, at).map_or(0, |b| u16::from_le_bytes(b) as INT)
    });
    engine.register_fn("read_i16le", |blob: &mut Blob, at: INT| -> INT {
        read::<2>(blob, at).map_or(0, |b| i16::from_le_bytes(b) as INT)
    });
    engine.register_fn("read_u32le", |blob: &mut Blob, at: INT| -> INT {
        read::<4>(blob, at).map_or(0, |b| u32::from_le_bytes(b) as INT)
    });
    engine.register_fn("read_i32le", |blob: &mut Blob, at: INT| -> INT {
        read::<4>(blob, at).map_or(0, |b| i32::from_le_bytes(b) as INT)
    });
    engine.register_fn("read_f32le", |blob: &mut Blob, at: INT| -> FLOAT {
        read::<4>(blob, at).map_or(0.0, |b| f32::from_le_bytes(b) as FLOAT)
    });

    engine.register_fn("text_slice", |blob: &mut Blob, start: INT, end: INT| -> String {
        let (start, end) = clamp_range(blob.len(), start, end);
        String::from_utf8_lossy(&blob[start..end]).into_owned()
    });
    engine.register_fn("parse_numbers", |blob: &mut Blob, start: INT, end: INT| -> Array {
        let (start, end) = clamp_range(blob.len(), start, end);
        let text = String::from_utf8_lossy(&blob[start..end]);
        default_tokens(&text).into_iter().map(Dynamic::from_float).collect()
    });
}

fn find_from(blob: &[u8], byte: INT, start: INT) -> INT {
    let start = start.max(0) as usize;
    if start >= blob.len() {
        return -1;
    }
    blob[start..].iter().position(|&b| b as INT == byte).map_or(-1, |i| (start + i) as INT)
}

fn read<const N: usize>(blob: &[u8], at: INT) -> Option<[u8; N]> {
    let at = usize::try_from(at).ok()?;
    blob.get(at..at.checked_add(N)?)?.try_into().ok()
}

fn clamp_range(len: usize, start: INT, end: INT) -> (usize, usize) {
    let start = (start.max(0) as usize).min(len);
    let end = (end.max(0) as usize).clamp(start, len);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_PARSER: &str = r#"
        fn parse(bytes) {
            let nl = bytes.find_byte(10);
            if nl < 0 { return #{ values: (), frameByteLength: 0 }; }
            #{ values: parse_numbers(bytes, 0, nl), frameByteLength: nl + 1 }
        }
    "#;

    #[test]
    fn line_parser_produces_custom_frames() {
        let codec = UserCodec::compile(LINE_PARSER).unwrap();
        codec.probe().unwrap();

        assert_eq!(
            codec.parse(b"1.5, 2\nrest"),
            ParseOutcome::frame(Frame::Custom { values: vec![1.5, 2.0], raw: b"1.5, 2\n".to_vec() }, 7)
        );
        assert_eq!(codec.parse(b"no newline"), ParseOutcome::NeedMore);
    }

    #[test]
    fn binary_helpers_read_little_endian() {
        let source = r#"
            fn parse(bytes) {
                if bytes.len() < 7 { return #{ values: (), frameByteLength: 0 }; }
                #{
                    values: [bytes.read_u8(0), bytes.read_i16le(1), bytes.read_f32le(3), bytes.read_u32le(100)],
                    frameByteLength: 7
                }
            }
        "#;
        let codec = UserCodec::compile(source).unwrap();

        let mut buf = vec![0x07];
        buf.extend_from_slice(&(-300i16).to_le_bytes());
        buf.extend_from_slice(&2.5f32.to_le_bytes());

        assert_eq!(
            codec.parse(&buf),
            ParseOutcome::frame(Frame::Custom { values: vec![7.0, -300.0, 2.5, 0.0], raw: buf.clone() }, 7)
        );
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let err = UserCodec::compile("fn decode(bytes) { 1 }").unwrap_err();
        assert!(err.to_string().contains("fn parse(bytes)"));
    }

    #[test]
    fn syntax_errors_are_rejected() {
        let err = UserCodec::compile("fn parse(bytes) { let = ; }").unwrap_err();
        assert!(matches!(err, AresplotError::UserParser { .. }));
    }

    #[test]
    fn probe_rejects_bad_shapes() {
        for source in [
            "fn parse(bytes) { 42 }",
            "fn parse(bytes) { #{ values: [1] } }",
            "fn parse(bytes) { #{ values: [1], frameByteLength: 99 } }",
            "fn parse(bytes) { #{ values: [\"x\"], frameByteLength: 1 } }",
            "fn parse(bytes) { throw \"boom\"; }",
        ] {
            let codec = UserCodec::compile(source).unwrap();
            assert!(codec.probe().is_err(), "probe accepted {}", source);
        }
    }

    #[test]
    fn runtime_fault_skips_one_line() {
        let source = r#"
            fn parse(bytes) {
                if bytes[0] == 120 { throw "bad"; }
                #{ values: [1], frameByteLength: 1 }
            }
        "#;
        let codec = UserCodec::compile(source).unwrap();

        match codec.parse(b"xyz\n1") {
            ParseOutcome::Frame {
                frame: Frame::Unidentified { raw, reason: UnidentifiedReason::UserParserFault(_) },
                consumed,
            } => {
                assert_eq!(raw, b"xyz\n".to_vec());
                assert_eq!(consumed, 4);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(codec.parse(b"xyz").consumed(), 3);
    }

    #[test]
    fn runaway_scripts_are_bounded() {
        let codec = UserCodec::compile("fn parse(bytes) { loop {} }").unwrap();
        assert!(codec.probe().is_err());
    }

    #[test]
    fn sandbox_has_no_eval_or_imports() {
        for source in [
            "fn parse(bytes) { eval(\"#{ values: (), frameByteLength: 1 }\") }",
            "fn parse(bytes) { import \"std\" as s; #{ values: (), frameByteLength: 1 } }",
        ] {
            let accepted = UserCodec::compile(source).and_then(|codec| codec.probe());
            assert!(accepted.is_err(), "sandbox accepted {}", source);
        }
    }

    #[test]
    fn unit_values_consume_without_values() {
        let codec = UserCodec::compile("fn parse(bytes) { #{ values: (), frameByteLength: 1 } }").unwrap();
        assert_eq!(codec.parse(b"ab"), ParseOutcome::frame(Frame::Custom { values: vec![], raw: b"a".to_vec() }, 1));
    }

    #[test]
    fn helper_ranges_are_clamped() {
        assert_eq!(clamp_range(4, -3, 10), (0, 4));
        assert_eq!(clamp_range(4, 3, 1), (3, 3));
        assert_eq!(find_from(b"a\nb\n", 10, 2), 3);
        assert_eq!(find_from(b"abc", 10, 0), -1);
        assert_eq!(read::<2>(b"\x01\x02", 1), None);
    }
}
