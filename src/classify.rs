use anyhow::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes inspected from the head of a file when classifying it.
const SNIFF_WINDOW: usize = 8192;

/// Control bytes allowed in text (everything else counts against it).
const TEXT_CONTROL: &[u8] = &[b'\n', b'\r', b'\t', 0x0c];

/// Ratio of disallowed bytes above which a file is considered binary.
const BINARY_RATIO: f64 = 0.30;

/// Classification of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    /// Content is never read for matching or rewriting.
    Binary,
    /// Text with a detected encoding label ("utf-8" or the "latin-1" fallback).
    Text { encoding: String },
}

impl ContentKind {
    pub fn is_binary(&self) -> bool {
        matches!(self, ContentKind::Binary)
    }
}

/// Classify a byte window as binary or text and pick a probable encoding.
///
/// Heuristic: any NUL byte, or a high ratio of non-text control bytes, means
/// binary. For text, strict UTF-8 validity selects "utf-8"; anything else
/// falls back deterministically to "latin-1" (every byte decodes, so scanning
/// and rewriting stay lossless at the byte level).
pub fn classify_bytes(window: &[u8]) -> ContentKind {
    if window.contains(&0) {
        return ContentKind::Binary;
    }
    if !window.is_empty() {
        let suspicious = window
            .iter()
            .filter(|&&b| b < 0x20 && !TEXT_CONTROL.contains(&b))
            .count();
        if suspicious as f64 / window.len() as f64 > BINARY_RATIO {
            return ContentKind::Binary;
        }
    }
    let encoding = if std::str::from_utf8(window).is_ok() {
        "utf-8"
    } else {
        "latin-1"
    };
    ContentKind::Text {
        encoding: encoding.to_string(),
    }
}

/// Classify a file on disk by sniffing its head window.
pub fn classify_file(path: &Path) -> Result<ContentKind> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; SNIFF_WINDOW];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    // A UTF-8 sequence truncated by the window boundary must not demote the
    // file to latin-1; trim at most 3 trailing continuation bytes.
    if filled == SNIFF_WINDOW {
        let mut end = buf.len();
        for _ in 0..3 {
            if end > 0 && buf[end - 1] & 0xC0 == 0x80 {
                end -= 1;
            }
        }
        if end > 0 && buf[end - 1] >= 0xC0 {
            end -= 1;
        }
        buf.truncate(end);
    }
    Ok(classify_bytes(&buf))
}

/// Escape a raw byte line as a JSON-safe string.
///
/// Valid UTF-8 runs are copied through with backslashes doubled; every byte
/// that is not part of valid UTF-8 becomes `\xNN`. Lossless: `unescape_bytes`
/// restores the original bytes exactly.
pub fn escape_bytes(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_escaped(&mut out, valid);
                return out;
            }
            Err(err) => {
                let (valid, tail) = rest.split_at(err.valid_up_to());
                // split_at on valid_up_to always yields a valid prefix
                if let Ok(s) = std::str::from_utf8(valid) {
                    push_escaped(&mut out, s);
                }
                let bad = err.error_len().unwrap_or(tail.len());
                for &b in &tail[..bad] {
                    out.push_str(&format!("\\x{:02X}", b));
                }
                rest = &tail[bad..];
            }
        }
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for ch in s.chars() {
        if ch == '\\' {
            out.push_str("\\\\");
        } else {
            out.push(ch);
        }
    }
}

/// Invert `escape_bytes`.
pub fn unescape_bytes(escaped: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
                    (Some(h), Some(l)) => out.push((h * 16 + l) as u8),
                    _ => {
                        // Malformed escape; reproduce the input literally.
                        out.push(b'\\');
                        out.push(b'x');
                        for c in [hi, lo].into_iter().flatten() {
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
            }
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}
