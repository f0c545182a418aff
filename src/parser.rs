// Slice-based STOMP frame parser shared by the stream and SockJS codecs.
use crate::error::FrameError;
use crate::frame::{Command, Frame, Headers};

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
pub fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse [`escape_header_value`].
///
/// Any escape sequence other than `\\`, `\r`, `\n` and `\c` (including a
/// trailing lone backslash) is a format error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => {
                return Err(FrameError::Format(format!(
                    "invalid escape sequence '\\{}'",
                    other as char
                )));
            }
            None => {
                return Err(FrameError::Format(
                    "trailing backslash in header".to_string(),
                ));
            }
        }
    }
    Ok(out)
}

/// Split one raw header line into its unescaped name and value.
///
/// The colon separating name and value must exist and must not be the first
/// byte of the line.
pub fn parse_header_line(line: &[u8]) -> Result<(String, String), FrameError> {
    let colon = match line.iter().position(|&b| b == b':') {
        Some(i) if i > 0 => i,
        _ => {
            return Err(FrameError::Format(format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            )));
        }
    };
    let name = decode_utf8(unescape_header_value(&line[..colon])?, "header name")?;
    let value = decode_utf8(unescape_header_value(&line[colon + 1..])?, "header value")?;
    Ok((name, value))
}

fn decode_utf8(raw: Vec<u8>, what: &str) -> Result<String, FrameError> {
    String::from_utf8(raw).map_err(|e| FrameError::Format(format!("invalid utf8 in {}: {}", what, e)))
}

/// Strip one trailing CR, so both `\n` and `\r\n` line endings are accepted.
pub(crate) fn trim_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

/// Parse a single STOMP frame from the start of `input`.
///
/// `input` must start at a command line (heartbeats are handled by the
/// caller). Returns `Ok(Some((frame, consumed)))` when a whole frame is
/// available, `Ok(None)` when more bytes are required and `Err` on protocol
/// errors. The command and header section may not grow past
/// `max_header_len` bytes.
pub fn parse_frame_slice(
    input: &[u8],
    max_header_len: usize,
) -> Result<Option<(Frame, usize)>, FrameError> {
    let len = input.len();

    let need_more = |buffered: usize| -> Result<Option<(Frame, usize)>, FrameError> {
        if buffered > max_header_len {
            Err(FrameError::HeaderOverflow(max_header_len))
        } else {
            Ok(None)
        }
    };

    // command line
    let Some(cmd_end) = input.iter().position(|&b| b == b'\n') else {
        return need_more(len);
    };
    let command = Command::from_bytes(trim_cr(&input[..cmd_end]))?;
    let mut pos = cmd_end + 1;

    // headers until an empty line
    let mut headers = Headers::new();
    loop {
        let Some(line_end_rel) = input[pos..].iter().position(|&b| b == b'\n') else {
            return need_more(len);
        };
        let line = trim_cr(&input[pos..pos + line_end_rel]);
        pos += line_end_rel + 1;
        if line.is_empty() {
            break;
        }
        let (name, value) = parse_header_line(line)?;
        headers.add(name, value);
    }
    if pos > max_header_len {
        return Err(FrameError::HeaderOverflow(max_header_len));
    }

    let body = match headers.content_length()? {
        Some(content_len) => {
            // need content_len bytes, plus terminating NUL
            let end = pos
                .checked_add(content_len)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(|| FrameError::Format("content-length too large".to_string()))?;
            if end > len {
                return Ok(None);
            }
            let body = input[pos..pos + content_len].to_vec();
            pos += content_len;
            if input[pos] != 0 {
                return Err(FrameError::Format(
                    "missing NUL terminator after content-length body".to_string(),
                ));
            }
            pos += 1;
            body
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                let body = input[pos..pos + nul_rel].to_vec();
                pos += nul_rel + 1;
                body
            }
            None => return Ok(None),
        },
    };

    // optional EOL after the NUL
    if input[pos..].starts_with(b"\r\n") {
        pos += 2;
    } else if input.get(pos) == Some(&b'\n') {
        pos += 1;
    }

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        pos,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_then_unescape_is_identity() {
        for s in ["plain", "a:b", "line1\nline2", "back\\slash", "\r\n:\\", ""] {
            let escaped = escape_header_value(s);
            assert!(!escaped.contains('\n'));
            assert!(!escaped.contains(':'));
            let back = unescape_header_value(escaped.as_bytes()).unwrap();
            assert_eq!(back, s.as_bytes());
        }
    }

    #[test]
    fn unknown_escape_is_format_error() {
        assert!(matches!(
            unescape_header_value(b"bad\\t"),
            Err(FrameError::Format(_))
        ));
        assert!(matches!(
            unescape_header_value(b"dangling\\"),
            Err(FrameError::Format(_))
        ));
    }

    #[test]
    fn leading_colon_is_rejected() {
        assert!(parse_header_line(b":value").is_err());
        assert!(parse_header_line(b"novalue").is_err());
        assert_eq!(
            parse_header_line(b"k:v:w").unwrap(),
            ("k".to_string(), "v:w".to_string())
        );
    }

    #[test]
    fn invalid_content_length_is_error() {
        let raw = b"SEND\ncontent-length:xyz\n\nhello\0".to_vec();
        match parse_frame_slice(&raw, 4096) {
            Err(FrameError::Format(_)) => {}
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn content_length_near_usize_max_is_format_error() {
        let raw = format!("MESSAGE\ncontent-length:{}\n\nhello\0", usize::MAX);
        match parse_frame_slice(raw.as_bytes(), 4096) {
            Err(FrameError::Format(msg)) => assert!(msg.contains("too large")),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn partial_command_line_needs_more() {
        assert!(parse_frame_slice(b"SEN", 4096).unwrap().is_none());
    }

    #[test]
    fn oversized_header_section_overflows() {
        let mut raw = b"SEND\nx:".to_vec();
        raw.extend(std::iter::repeat_n(b'a', 64));
        assert!(matches!(
            parse_frame_slice(&raw, 32),
            Err(FrameError::HeaderOverflow(32))
        ));
    }
}
