//! Export of record trees: JSON lines, pretty "peek" output and flat
//! delimited rows.

use crate::Result;
use crate::path::FieldPath;
use crate::tree::RecordTree;

use std::io::Write;

/// One tree as a single JSON line.
pub fn to_json_line(tree: &RecordTree) -> Result<String> {
    Ok(serde_json::to_string(&tree.to_json())?)
}

/// Pretty JSON for interactive inspection.
pub fn peek(tree: &RecordTree) -> Result<String> {
    Ok(serde_json::to_string_pretty(&tree.to_json())?)
}

/// Values at `fields`, joined by `delimiter`. Missing fields render empty;
/// delimiters and line breaks inside values are replaced by spaces.
pub fn to_delimited(tree: &RecordTree, fields: &[FieldPath], delimiter: char) -> String {
    fields
        .iter()
        .map(|f| {
            tree.get(f)
                .map(|v| sanitize(&v.to_flat(), delimiter))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

pub fn header(fields: &[FieldPath], delimiter: char) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

fn sanitize(s: &str, delimiter: char) -> String {
    s.chars()
        .map(|c| if c == delimiter || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

pub fn write_json_lines<W: Write>(trees: &[RecordTree], out: &mut W) -> Result<()> {
    for tree in trees {
        writeln!(out, "{}", to_json_line(tree)?)?;
    }
    Ok(())
}

pub fn write_delimited<W: Write>(
    trees: &[RecordTree],
    fields: &[FieldPath],
    delimiter: char,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "{}", header(fields, delimiter))?;
    for tree in trees {
        writeln!(out, "{}", to_delimited(tree, fields, delimiter))?;
    }
    Ok(())
}
