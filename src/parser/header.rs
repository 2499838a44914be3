//! Header block splitting.
//!
//! Fields are kept as raw bytes (continuation lines included) so that a part
//! nobody touches is written back unchanged.

use crate::model::part::HeaderField;

/// Header fields of a part and the offsets around the blank line.
///
/// `data[separator_start..body_start]` is the blank line itself, empty when
/// the part had none.
#[derive(Debug)]
pub struct HeaderBlock {
    pub fields: Vec<HeaderField>,
    pub separator_start: usize,
    pub body_start: usize,
}

/// Split `data` into header fields and body.
///
/// The header block ends at the first empty line (`\n` or `\r\n`). Data
/// starting with an empty line has no headers. Without any empty line the
/// whole input is headers and the body is empty.
pub fn split_header_block(data: &[u8]) -> HeaderBlock {
    let mut fields: Vec<HeaderField> = Vec::new();
    let mut pending: Option<(String, Vec<u8>)> = None;
    let mut pos = 0;

    while pos < data.len() {
        let line_end = match memchr_newline(&data[pos..]) {
            Some(off) => pos + off + 1,
            None => data.len(),
        };
        let line = &data[pos..line_end];

        if is_blank_line(line) {
            if let Some((name, raw)) = pending.take() {
                fields.push(HeaderField::from_raw(name, raw));
            }
            return HeaderBlock {
                fields,
                separator_start: pos,
                body_start: line_end,
            };
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            // Continuation line
            match pending.as_mut() {
                Some((_, raw)) => raw.extend_from_slice(line),
                None => pending = Some((String::new(), line.to_vec())),
            }
        } else {
            if let Some((name, raw)) = pending.take() {
                fields.push(HeaderField::from_raw(name, raw));
            }
            let name = line
                .iter()
                .position(|&b| b == b':')
                .map(|colon| String::from_utf8_lossy(&line[..colon]).trim().to_string())
                .unwrap_or_default();
            pending = Some((name, line.to_vec()));
        }

        pos = line_end;
    }

    if let Some((name, raw)) = pending.take() {
        fields.push(HeaderField::from_raw(name, raw));
    }
    HeaderBlock {
        fields,
        separator_start: data.len(),
        body_start: data.len(),
    }
}

/// Skip a UTF-8 BOM and a leading MBOX `From ` separator line, if present.
pub fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = memchr_newline(data) {
            return &data[pos + 1..];
        }
    }
    data
}

/// Strip one trailing line ending (`\r\n` or `\n`).
pub fn trim_one_eol(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))
        .unwrap_or(data)
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
pub(crate) fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is empty apart from its terminator.
fn is_blank_line(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}
