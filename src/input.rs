//! Input decoding boundary: bytes in, a decoded character buffer out.
//!
//! Encoding handling is deliberately small: BOM sniffing for UTF-8 and
//! UTF-16, otherwise the label from the XML declaration (or a caller
//! override) resolved through `encoding_rs`. The reader checks the
//! abort token between chunk reads, which is the cooperative stand-in
//! for interrupting a worker blocked on I/O.

use std::io::Read;
use std::rc::Rc;

use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

use crate::{
    abort::AbortToken,
    error::{ParseDiagnostic, XmlError, XmlErrorCode},
};

const CHUNK: usize = 8 * 1024;

/// A fully decoded input with its detected encoding name.
#[derive(Debug, Clone)]
pub struct DecodedInput {
    pub text: String,
    pub encoding: &'static str,
    pub system_id: Option<Rc<str>>,
}

fn sniff(bytes: &[u8]) -> (&'static Encoding, usize) {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => (UTF_8, 3),
        [0xFE, 0xFF, ..] => (UTF_16BE, 2),
        [0xFF, 0xFE, ..] => (UTF_16LE, 2),
        // No BOM: "<?" in UTF-16 shows up as alternating zero bytes.
        [0x00, b'<', 0x00, b'?', ..] => (UTF_16BE, 0),
        [b'<', 0x00, b'?', 0x00, ..] => (UTF_16LE, 0),
        _ => (UTF_8, 0),
    }
}

/// Peek at the declared encoding label in an XML declaration prefix.
/// Only consulted when no BOM decided the question.
fn declared_label(prefix: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(&prefix[..prefix.len().min(256)]).ok()?;
    let decl = text.strip_prefix("<?xml")?;
    let end = decl.find("?>")?;
    let decl = &decl[..end];
    let pos = decl.find("encoding")?;
    let rest = decl[pos + "encoding".len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let close = rest.find(quote)?;
    Some(rest[..close].to_string())
}

fn decode_error(what: &str) -> XmlError {
    XmlError::Fatal(ParseDiagnostic {
        code: XmlErrorCode::UnsupportedEncoding,
        message: what.to_string(),
        system_id: None,
        line: 1,
        column: 1,
    })
}

/// Decode a complete in-memory buffer.
pub fn decode_bytes(bytes: &[u8], label_override: Option<&str>) -> Result<DecodedInput, XmlError> {
    let (mut encoding, bom_len) = sniff(bytes);
    if bom_len == 0 {
        let label = label_override
            .map(str::to_string)
            .or_else(|| declared_label(bytes));
        if let Some(label) = label {
            encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| decode_error(&format!("unsupported encoding \"{label}\"")))?;
        }
    }
    let (text, actual, malformed) = encoding.decode(&bytes[bom_len..]);
    if malformed {
        return Err(decode_error(&format!(
            "input is not valid {}",
            actual.name()
        )));
    }
    Ok(DecodedInput {
        text: text.into_owned(),
        encoding: actual.name(),
        system_id: None,
    })
}

/// Drain a reader and decode, checking the abort token between chunks.
pub fn decode_reader(
    reader: &mut dyn Read,
    label_override: Option<&str>,
    abort: &AbortToken,
) -> Result<DecodedInput, XmlError> {
    let mut bytes = Vec::with_capacity(CHUNK);
    let mut buf = [0u8; CHUNK];
    loop {
        abort.check()?;
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => bytes.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                // A signal woke the read; the abort check above decides
                // whether that was a cancellation.
                continue;
            }
            Err(err) => {
                return Err(XmlError::Fatal(ParseDiagnostic {
                    code: XmlErrorCode::InternalError,
                    message: format!("read error: {err}"),
                    system_id: None,
                    line: 0,
                    column: 0,
                }));
            }
        }
    }
    decode_bytes(&bytes, label_override)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bom_is_stripped() {
        let decoded = decode_bytes(b"\xEF\xBB\xBF<doc/>", None).unwrap();
        assert_eq!(decoded.text, "<doc/>");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn utf16le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "<a/>".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode_bytes(&bytes, None).unwrap();
        assert_eq!(decoded.text, "<a/>");
        assert_eq!(decoded.encoding, "UTF-16LE");
    }

    #[test]
    fn declared_label_is_used() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>";
        let decoded = decode_bytes(bytes, None).unwrap();
        assert!(decoded.text.contains('\u{E9}'));
        assert_eq!(decoded.encoding, "windows-1252");
    }

    #[test]
    fn unknown_label_is_rejected() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"EBCDIC-FANCY\"?><a/>";
        let err = decode_bytes(bytes, None).unwrap_err();
        assert!(matches!(err, XmlError::Fatal(d) if d.code == XmlErrorCode::UnsupportedEncoding));
    }

    #[test]
    fn aborted_reader_cancels() {
        let abort = AbortToken::new();
        let handle = crate::abort::AbortHandle::new(abort.clone());
        handle.abort();
        let mut reader: &[u8] = b"<a/>";
        let err = decode_reader(&mut reader, None, &abort).unwrap_err();
        assert!(err.is_cancelled());
    }
}
