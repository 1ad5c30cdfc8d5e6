use std::fmt::Write;

use crate::ParseError;

/// Quotes `bytes` as a double-quoted literal.
///
/// `\\`, `\"`, `\n`, `\r` and `\t` use their short forms. Any other control
/// byte, DEL, and (for strings that are not valid UTF-8) every byte above
/// 0x7F is written as a three-digit decimal escape, so the next literal digit
/// can never be absorbed into the escape on decode.
pub fn escape_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            for ch in text.chars() {
                if ch.is_ascii() {
                    push_ascii(&mut out, ch as u8);
                } else {
                    out.push(ch);
                }
            }
        }
        Err(_) => {
            for &byte in bytes {
                if byte.is_ascii() {
                    push_ascii(&mut out, byte);
                } else {
                    push_decimal(&mut out, byte);
                }
            }
        }
    }
    out.push('"');
    out
}

fn push_ascii(out: &mut String, byte: u8) {
    match byte {
        b'\\' => out.push_str("\\\\"),
        b'"' => out.push_str("\\\""),
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        0x00..=0x1F | 0x7F => push_decimal(out, byte),
        _ => out.push(byte as char),
    }
}

fn push_decimal(out: &mut String, byte: u8) {
    let _ = write!(out, "\\{byte:03}");
}

/// Decodes a complete double-quoted literal produced by [`escape_string`].
pub fn unescape_string(quoted: &str) -> Result<Vec<u8>, ParseError> {
    let bytes = quoted.as_bytes();
    if bytes.first() != Some(&b'"') {
        return Err(ParseError::ExpectedValue(1));
    }
    let (value, end) = read_quoted(bytes, 0)?;
    if end != bytes.len() {
        return Err(ParseError::TrailingInput(end + 1));
    }
    Ok(value)
}

/// Reads the literal whose opening quote sits at `start`; returns the decoded
/// bytes and the index just past the closing quote.
pub(crate) fn read_quoted(bytes: &[u8], start: usize) -> Result<(Vec<u8>, usize), ParseError> {
    let mut out = Vec::new();
    let mut index = start + 1;
    loop {
        let Some(&byte) = bytes.get(index) else {
            return Err(ParseError::UnterminatedString(start + 1));
        };
        match byte {
            b'"' => return Ok((out, index + 1)),
            b'\n' | b'\r' => return Err(ParseError::UnterminatedString(start + 1)),
            b'\\' => {
                let Some(&escape) = bytes.get(index + 1) else {
                    return Err(ParseError::UnterminatedString(start + 1));
                };
                index += 2;
                match escape {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'v' => out.push(0x0B),
                    b'\\' | b'"' | b'\'' => out.push(escape),
                    b'0'..=b'9' => {
                        let mut value = u32::from(escape - b'0');
                        let mut digits = 1;
                        while digits < 3 {
                            match bytes.get(index) {
                                Some(next) if next.is_ascii_digit() => {
                                    value = value * 10 + u32::from(next - b'0');
                                    index += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        let byte = u8::try_from(value).map_err(|_| ParseError::EscapeOutOfRange(value))?;
                        out.push(byte);
                    }
                    other => {
                        return Err(ParseError::InvalidEscape {
                            escape: other as char,
                            column: index - 1,
                        })
                    }
                }
            }
            other => {
                out.push(other);
                index += 1;
            }
        }
    }
}
