//! Text rendering of entries, in the same block shape the parser reads.
//!
//! ```text
//! goroutine 5 [select, 12 minutes]: 2 times: [(5, 12), (9, 3)]
//! main.loop(...)
//! 	/src/loop.go:33 +0x45
//!
//! ```
//!
//! The `times` suffix only appears on deduplicated entries. Output without
//! it parses back into the same ids, states, durations and traces.

use std::io::{self, Write};

use crate::dump::Dump;
use crate::entry::Entry;

/// Header line as rendered, with the duplicate suffix if any.
pub fn header_line(entry: &Entry) -> String {
    let duplicates = entry.duplicates();
    if duplicates.is_empty() {
        return entry.header().to_owned();
    }
    let listed = duplicates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {} times: [{listed}]", entry.header(), duplicates.len())
}

pub fn write_entry<W: Write + ?Sized>(w: &mut W, entry: &Entry) -> io::Result<()> {
    writeln!(w, "{}", header_line(entry))?;
    w.write_all(entry.trace_text().as_bytes())?;
    writeln!(w)
}

/// Rendered block as lines, ending with the blank separator line.
pub fn entry_lines(entry: &Entry) -> Vec<String> {
    let mut lines = vec![header_line(entry)];
    lines.extend(entry.trace_text().lines().map(str::to_owned));
    lines.push(String::new());
    lines
}

impl Dump {
    /// Writes every entry in dump order.
    pub fn save_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        for entry in self {
            write_entry(&mut w, entry)?;
        }
        w.flush()
    }

    pub fn render_lines(&self) -> Vec<String> {
        self.iter().flat_map(|entry| entry_lines(entry)).collect()
    }
}
