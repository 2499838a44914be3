//! Write a part tree back to RFC 5322 wire form.
//!
//! Every byte comes from the parsed tree: header fields, blank lines,
//! delimiter lines and the text around them are stored as read, so parts
//! that were not modified come out byte-for-byte.

use std::io::{self, Write};

use crate::model::part::{MessagePart, PartContent};

/// Serialize a message tree into a byte vector.
pub fn write_message(root: &MessagePart) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_part(root, &mut out);
    out
}

/// Serialize a message tree into any writer.
pub fn write_part<W: Write>(part: &MessagePart, out: &mut W) -> io::Result<()> {
    for field in part.headers() {
        out.write_all(field.raw())?;
    }
    out.write_all(part.separator())?;

    match part.content() {
        PartContent::Leaf(body) => out.write_all(&body.raw)?,
        PartContent::Container(mp) => {
            if let Some(preamble) = &mp.preamble {
                out.write_all(preamble)?;
            }
            for (delimiter, child) in mp.delimiters.iter().zip(&mp.children) {
                out.write_all(delimiter)?;
                write_part(child, out)?;
            }
            out.write_all(&mp.closing)?;
            if let Some(epilogue) = &mp.epilogue {
                out.write_all(epilogue)?;
            }
        }
    }
    Ok(())
}
