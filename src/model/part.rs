//! The owned MIME part tree.
//!
//! A [`MessagePart`] is either a leaf with a (transfer-encoded) body or a
//! multipart container with ordered children. Header fields keep their raw
//! bytes so untouched parts are written back exactly as they were read.

use crate::error::{Result, StashError};
use crate::parser::encoding;

/// Line terminator used when writing a part back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Pick the line ending of the first line break in `data` (LF when none).
    pub fn detect(data: &[u8]) -> Self {
        match data.iter().position(|&b| b == b'\n') {
            Some(pos) if pos > 0 && data[pos - 1] == b'\r' => Self::CrLf,
            _ => Self::Lf,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Content-Transfer-Encoding of a leaf body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, `8bit`, `binary` or no header at all.
    Identity,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Interpret a `Content-Transfer-Encoding` header value.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "base64" => Self::Base64,
            Some(v) if v == "quoted-printable" => Self::QuotedPrintable,
            _ => Self::Identity,
        }
    }
}

/// A single header field with its raw bytes (folded lines and line ending included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    raw: Vec<u8>,
}

impl HeaderField {
    /// Wrap raw bytes read from a message.
    pub fn from_raw(name: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            raw,
        }
    }

    /// Build a new single-line field.
    pub fn new(name: &str, value: &str, eol: LineEnding) -> Self {
        let mut raw = Vec::with_capacity(name.len() + value.len() + 4);
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(eol.as_bytes());
        Self {
            name: name.to_string(),
            raw,
        }
    }

    /// Field name as it appeared in the message.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Raw bytes of the field, including its line ending.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Append `eol` unless the raw bytes already end with a line break.
    ///
    /// Only the last field of a part without a blank line can lack one.
    pub fn terminate(&mut self, eol: LineEnding) {
        if !self.raw.ends_with(b"\n") {
            self.raw.extend_from_slice(eol.as_bytes());
        }
    }

    /// Unfolded value with surrounding whitespace trimmed.
    pub fn value(&self) -> String {
        let text = String::from_utf8_lossy(&self.raw);
        let after_colon = text.split_once(':').map(|(_, v)| v).unwrap_or("");
        after_colon
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Body of a leaf part, still in its transfer encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafBody {
    pub raw: Vec<u8>,
    pub encoding: TransferEncoding,
}

/// Children of a multipart container plus the exact bytes framing them.
///
/// Written back as `preamble`, then each `delimiters[i]` followed by
/// `children[i]`, then `closing` and `epilogue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    pub boundary: String,
    /// Text before the first delimiter; `None` when the body opens with it.
    pub preamble: Option<Vec<u8>>,
    pub children: Vec<MessagePart>,
    /// Raw framing in front of each child, one entry per child: the line
    /// break ending the previous section plus the whole `--boundary` line,
    /// trailing whitespace and line break included.
    pub delimiters: Vec<Vec<u8>>,
    /// Line break before the closing `--boundary--` plus that marker; empty
    /// when the closing delimiter was missing.
    pub closing: Vec<u8>,
    /// Bytes following the closing delimiter; `None` when it was missing.
    pub epilogue: Option<Vec<u8>>,
}

/// What a part holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartContent {
    Leaf(LeafBody),
    Container(Multipart),
}

/// A node of the parsed message tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    headers: Vec<HeaderField>,
    /// Blank line between headers and body, empty when the part has none.
    separator: Vec<u8>,
    eol: LineEnding,
    media_type: String,
    suggested_name: Option<String>,
    content: PartContent,
}

/// Header fields rewritten when a leaf is replaced by a placeholder.
const CONTENT_FIELDS: [&str; 3] = [
    "content-type",
    "content-transfer-encoding",
    "content-disposition",
];

impl MessagePart {
    /// Assemble a part. `media_type` is stored lowercased and the
    /// header/body separator defaults to a blank line in `eol`.
    pub fn new(
        headers: Vec<HeaderField>,
        eol: LineEnding,
        media_type: impl Into<String>,
        suggested_name: Option<String>,
        content: PartContent,
    ) -> Self {
        Self {
            headers,
            separator: eol.as_bytes().to_vec(),
            eol,
            media_type: media_type.into().to_ascii_lowercase(),
            suggested_name,
            content,
        }
    }

    /// Replace the header/body separator with the bytes read from the input.
    pub fn with_separator(mut self, separator: Vec<u8>) -> Self {
        self.separator = separator;
        self
    }

    /// `true` for multipart containers.
    pub fn is_container(&self) -> bool {
        matches!(self.content, PartContent::Container(_))
    }

    /// Ordered children (empty for leaves).
    pub fn children(&self) -> &[MessagePart] {
        match &self.content {
            PartContent::Container(mp) => &mp.children,
            PartContent::Leaf(_) => &[],
        }
    }

    /// Mutable access to the children (empty for leaves).
    pub fn children_mut(&mut self) -> &mut [MessagePart] {
        match &mut self.content {
            PartContent::Container(mp) => &mut mp.children,
            PartContent::Leaf(_) => &mut [],
        }
    }

    /// Declared media type, e.g. `application/pdf`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Filename from `Content-Disposition` or the `name` parameter.
    pub fn suggested_name(&self) -> Option<&str> {
        self.suggested_name.as_deref()
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.iter().find(|h| h.is(name)).map(HeaderField::value)
    }

    /// Raw blank line ending the header block (empty if there was none).
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    pub fn line_ending(&self) -> LineEnding {
        self.eol
    }

    pub fn content(&self) -> &PartContent {
        &self.content
    }

    /// Decode the body of a leaf part.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match &self.content {
            PartContent::Leaf(body) => encoding::decode(&body.raw, body.encoding),
            PartContent::Container(_) => Err(StashError::MimeError(
                "multipart container has no body of its own".into(),
            )),
        }
    }

    /// Replace this leaf's body with plain text.
    ///
    /// Content headers are rewritten, every other header is kept, and the
    /// part stays a leaf. Line breaks in `text` follow the part's line ending.
    pub fn replace_with_text(&mut self, text: &str) -> Result<()> {
        if self.is_container() {
            return Err(StashError::MimeError(
                "cannot replace a multipart container with text".into(),
            ));
        }
        let eol = self.eol;
        self.headers
            .retain(|h| !CONTENT_FIELDS.iter().any(|name| h.is(name)));
        for field in &mut self.headers {
            field.terminate(eol);
        }
        self.headers.push(HeaderField::new(
            "Content-Type",
            "text/plain; charset=\"utf-8\"",
            eol,
        ));
        let cte = if text.is_ascii() { "7bit" } else { "8bit" };
        self.headers
            .push(HeaderField::new("Content-Transfer-Encoding", cte, eol));
        self.headers
            .push(HeaderField::new("Content-Disposition", "inline", eol));

        let normalized = text.replace("\r\n", "\n");
        let mut raw = Vec::with_capacity(normalized.len() + 16);
        for (i, line) in normalized.split('\n').enumerate() {
            if i > 0 {
                raw.extend_from_slice(eol.as_bytes());
            }
            raw.extend_from_slice(line.as_bytes());
        }

        self.content = PartContent::Leaf(LeafBody {
            raw,
            encoding: TransferEncoding::Identity,
        });
        self.separator = eol.as_bytes().to_vec();
        self.media_type = "text/plain".to_string();
        self.suggested_name = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(headers: Vec<HeaderField>, body: &[u8], eol: LineEnding) -> MessagePart {
        MessagePart::new(
            headers,
            eol,
            "Application/PDF",
            Some("report.pdf".into()),
            PartContent::Leaf(LeafBody {
                raw: body.to_vec(),
                encoding: TransferEncoding::Identity,
            }),
        )
    }

    #[test]
    fn test_detect_line_ending() {
        assert_eq!(LineEnding::detect(b"a: b\r\n\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect(b"a: b\n\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect(b"no newline"), LineEnding::Lf);
    }

    #[test]
    fn test_header_value_unfolds() {
        let field = HeaderField::from_raw(
            "Content-Type",
            b"Content-Type: application/pdf;\r\n\tname=\"a.pdf\"\r\n".to_vec(),
        );
        assert_eq!(field.value(), "application/pdf; name=\"a.pdf\"");
        assert!(field.is("content-type"));
    }

    #[test]
    fn test_media_type_lowercased() {
        let part = leaf(Vec::new(), b"x", LineEnding::Lf);
        assert_eq!(part.media_type(), "application/pdf");
        assert_eq!(part.suggested_name(), Some("report.pdf"));
        assert!(!part.is_container());
        assert!(part.children().is_empty());
    }

    #[test]
    fn test_replace_with_text_rewrites_content_headers() {
        let headers = vec![
            HeaderField::new("Content-Type", "application/pdf", LineEnding::CrLf),
            HeaderField::new("Content-Transfer-Encoding", "base64", LineEnding::CrLf),
            HeaderField::new("X-Keep", "yes", LineEnding::CrLf),
        ];
        let mut part = leaf(headers, b"JVBERi0=", LineEnding::CrLf);
        part.replace_with_text("See: http://h/abc\n").unwrap();

        assert_eq!(part.media_type(), "text/plain");
        assert_eq!(part.suggested_name(), None);
        assert_eq!(part.header("x-keep").as_deref(), Some("yes"));
        assert_eq!(part.header("content-transfer-encoding").as_deref(), Some("7bit"));
        assert_eq!(
            part.headers().iter().filter(|h| h.is("content-type")).count(),
            1
        );
        assert_eq!(part.decoded_body().unwrap(), b"See: http://h/abc\r\n");
    }

    #[test]
    fn test_replace_headers_only_part_adds_separator() {
        let headers = vec![
            HeaderField::from_raw("X-Keep", b"X-Keep: yes".to_vec()),
            HeaderField::from_raw("Content-Type", b"Content-Type: image/png".to_vec()),
        ];
        let mut part = leaf(headers, b"", LineEnding::Lf).with_separator(Vec::new());
        part.replace_with_text("gone\n").unwrap();

        assert!(part.headers().iter().all(|h| h.raw().ends_with(b"\n")));
        assert_eq!(part.headers()[0].raw(), b"X-Keep: yes\n");
        assert_eq!(part.separator(), b"\n");
    }

    #[test]
    fn test_replace_container_is_rejected() {
        let mut part = MessagePart::new(
            Vec::new(),
            LineEnding::Lf,
            "multipart/mixed",
            None,
            PartContent::Container(Multipart {
                boundary: "b".into(),
                preamble: None,
                children: Vec::new(),
                delimiters: Vec::new(),
                closing: b"--b--".to_vec(),
                epilogue: None,
            }),
        );
        assert!(part.replace_with_text("x").is_err());
        assert!(part.decoded_body().is_err());
    }
}
