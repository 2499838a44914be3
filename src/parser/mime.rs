//! MIME structure parsing: builds an owned [`MessagePart`] tree.
//!
//! Boundaries are split here so that every byte outside a replaced part is
//! preserved. `mail-parser` interprets each part's header block (media type,
//! boundary, RFC 2047/2231 filenames).

use mail_parser::{MessageParser, MimeHeaders};
use tracing::{debug, warn};

use crate::error::{Result, StashError};
use crate::model::part::{
    HeaderField, LeafBody, LineEnding, MessagePart, Multipart, PartContent, TransferEncoding,
};
use crate::parser::header::{self, memchr_newline, trim_one_eol};

/// Maximum multipart nesting depth. Deeper containers are kept as opaque leaves.
const MAX_DEPTH: usize = 32;

/// Media type assumed when a part declares none (RFC 2045 §5.2).
const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// What the header block of a part says about its content.
#[derive(Debug, Default)]
struct PartInfo {
    media_type: Option<String>,
    boundary: Option<String>,
    filename: Option<String>,
}

/// Parse a complete raw message (headers + body) into a part tree.
pub fn parse_message(raw_message: &[u8]) -> Result<MessagePart> {
    let message_bytes = header::skip_from_line(raw_message);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(StashError::MimeError("empty message".into()));
    }
    let eol = LineEnding::detect(message_bytes);
    Ok(parse_part(message_bytes, eol, 0))
}

fn parse_part(data: &[u8], inherited: LineEnding, depth: usize) -> MessagePart {
    // A part keeps its own line ending; one without any line break
    // follows its parent.
    let eol = if memchr_newline(data).is_some() {
        LineEnding::detect(data)
    } else {
        inherited
    };
    let block = header::split_header_block(data);
    let separator = data[block.separator_start..block.body_start].to_vec();
    let body = &data[block.body_start..];
    let info = describe(&block.fields);

    let media_type = info
        .media_type
        .clone()
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());

    if media_type.starts_with("multipart/") {
        match (&info.boundary, depth < MAX_DEPTH) {
            (Some(boundary), true) => {
                if let Some(multipart) = split_multipart(body, boundary, eol, depth) {
                    return MessagePart::new(
                        block.fields,
                        eol,
                        media_type,
                        info.filename,
                        PartContent::Container(multipart),
                    )
                    .with_separator(separator);
                }
                warn!(boundary = %boundary, "Multipart body has no delimiter, keeping it opaque");
            }
            (None, _) => warn!(media_type = %media_type, "Multipart part without boundary"),
            (Some(_), false) => warn!(depth, "Multipart nesting too deep, keeping it opaque"),
        }
    }

    let encoding = TransferEncoding::from_header(
        block
            .fields
            .iter()
            .find(|f| f.is("content-transfer-encoding"))
            .map(HeaderField::value)
            .as_deref(),
    );

    MessagePart::new(
        block.fields,
        eol,
        media_type,
        info.filename,
        PartContent::Leaf(LeafBody {
            raw: body.to_vec(),
            encoding,
        }),
    )
    .with_separator(separator)
}

/// Ask `mail-parser` what a header block declares.
fn describe(fields: &[HeaderField]) -> PartInfo {
    let interesting: Vec<&HeaderField> = fields
        .iter()
        .filter(|f| f.is("content-type") || f.is("content-disposition"))
        .collect();
    if interesting.is_empty() {
        return PartInfo::default();
    }

    // Only the content headers are handed over, followed by an empty body, so
    // mail-parser never has to look at the (possibly huge) payload.
    let mut buf = Vec::new();
    for field in interesting {
        buf.extend_from_slice(trim_one_eol(field.raw()));
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");

    let parser = MessageParser::default();
    let Some(parsed) = parser.parse(&buf[..]) else {
        debug!("mail-parser could not read content headers");
        return PartInfo::default();
    };
    let Some(root) = parsed.parts.first() else {
        return PartInfo::default();
    };

    let content_type = root.content_type();
    let media_type = content_type.map(|ct| {
        let main = ct.ctype();
        match ct.subtype() {
            Some(sub) => format!("{main}/{sub}"),
            None => main.to_string(),
        }
        .to_ascii_lowercase()
    });
    let boundary = content_type
        .and_then(|ct| ct.attribute("boundary"))
        .map(String::from);
    let filename = root
        .attachment_name()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from);

    PartInfo {
        media_type,
        boundary,
        filename,
    }
}

/// Split a multipart body on its delimiter lines.
///
/// The line break before each delimiter belongs to the delimiter, and the
/// delimiter lines are kept byte-for-byte. Returns `None` when no delimiter
/// line is found.
fn split_multipart(body: &[u8], boundary: &str, eol: LineEnding, depth: usize) -> Option<Multipart> {
    let dash_boundary = format!("--{boundary}");
    let dash_boundary = dash_boundary.as_bytes();

    let mut preamble: Option<Vec<u8>> = None;
    let mut children = Vec::new();
    let mut delimiters = Vec::new();
    // Start of the current child's bytes, once the first delimiter was seen.
    let mut open: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = match memchr_newline(&body[pos..]) {
            Some(off) => pos + off + 1,
            None => body.len(),
        };
        let line = trim_one_eol(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(dash_boundary) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(|b| *b == b' ' || *b == b'\t') {
                let frame_start = match open {
                    None => {
                        let frame_start = line_break_before(body, 0, pos);
                        if pos > 0 {
                            preamble = Some(body[..frame_start].to_vec());
                        }
                        frame_start
                    }
                    Some(start) => {
                        let frame_start = line_break_before(body, start, pos);
                        children.push(parse_part(&body[start..frame_start], eol, depth + 1));
                        frame_start
                    }
                };
                if closing {
                    let marker_end = pos + dash_boundary.len() + 2;
                    return Some(Multipart {
                        boundary: boundary.to_string(),
                        preamble,
                        children,
                        delimiters,
                        closing: body[frame_start..marker_end].to_vec(),
                        epilogue: Some(body[marker_end..].to_vec()),
                    });
                }
                delimiters.push(body[frame_start..line_end].to_vec());
                open = Some(line_end);
            }
        }

        pos = line_end;
    }

    let start = open?;
    // Closing delimiter missing: the last child runs to the end of the body.
    children.push(parse_part(&body[start..], eol, depth + 1));
    warn!(boundary = %boundary, "Multipart body has no closing delimiter");
    Some(Multipart {
        boundary: boundary.to_string(),
        preamble,
        children,
        delimiters,
        closing: Vec::new(),
        epilogue: None,
    })
}

/// Start of the line break ending just before `pos`, never reaching below
/// `floor`.
fn line_break_before(body: &[u8], floor: usize, pos: usize) -> usize {
    let mut start = pos;
    if start > floor && body[start - 1] == b'\n' {
        start -= 1;
        if start > floor && body[start - 1] == b'\r' {
            start -= 1;
        }
    }
    start
}
