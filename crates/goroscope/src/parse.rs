//! Turns raw dump text into entries.
//!
//! A block starts at a `goroutine <id> [<annotations>]:` header and ends at a
//! blank line, the next header, or the end of input. Lines outside any block
//! are dropped: real captures are often wrapped in log noise.

use std::io::BufRead;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::dump::Dump;
use crate::entry::{Entry, EntryBuilder};
use crate::error::{Error, Result};

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^goroutine\s+(\d+)\s+\[(.*)\]:$").expect("header pattern is valid")
    })
}

/// Incremental parser state. Feed lines with [`Parser::push_line`], then
/// call [`Parser::finish`].
#[derive(Default)]
pub struct Parser {
    line_no: usize,
    open: Option<EntryBuilder>,
    entries: Vec<Rc<Entry>>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        self.line_no += 1;
        if let Some(builder) = parse_header(line, self.line_no)? {
            self.close();
            self.open = Some(builder);
        } else if line.is_empty() {
            self.close();
        } else if let Some(builder) = self.open.as_mut() {
            builder.add_line(line);
        } else {
            trace!(line = self.line_no, "dropping line outside any goroutine block");
        }
        Ok(())
    }

    pub fn finish(mut self) -> Dump {
        self.close();
        debug!(
            entries = self.entries.len(),
            lines = self.line_no,
            "parsed goroutine dump"
        );
        Dump::from_entries(self.entries)
    }

    fn close(&mut self) {
        if let Some(builder) = self.open.take() {
            self.entries.push(Rc::new(builder.finish()));
        }
    }
}

/// Starts an entry if `line` is a block header.
fn parse_header(line: &str, line_no: usize) -> Result<Option<EntryBuilder>> {
    let Some(caps) = header_pattern().captures(line) else {
        return Ok(None);
    };
    let digits = &caps[1];
    let id = digits.parse::<u64>().map_err(|err| Error::Parse {
        line: line_no,
        message: format!("invalid goroutine id {digits:?}: {err}"),
    })?;
    let annotations = caps[2]
        .split(',')
        .map(|field| field.trim().to_owned())
        .collect();
    Ok(Some(EntryBuilder::new(id, line, annotations)))
}

/// Parses a sequence of lines (without their terminators).
pub fn parse_lines<I, S>(lines: I) -> Result<Dump>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = Parser::new();
    for line in lines {
        parser.push_line(line.as_ref())?;
    }
    Ok(parser.finish())
}

pub fn parse_str(text: &str) -> Result<Dump> {
    parse_lines(text.lines())
}

/// Parses from a reader. Read failures come back as [`Error::Io`].
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Dump> {
    let mut parser = Parser::new();
    for line in reader.lines() {
        parser.push_line(&line?)?;
    }
    Ok(parser.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const TWO: &str = "\
goroutine 1 [running]:
main.main()
\t/src/main.go:10 +0x1d

goroutine 2 [select, 15 minutes]:
main.loop(0xc000010000)
\t/src/loop.go:33 +0x45
created by main.main
\t/src/main.go:12 +0x2e
";

    #[test]
    fn headers_give_state_and_duration() {
        let dump = parse_str(TWO).unwrap();
        let entries = dump.entries();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id(), 1);
        assert_eq!(entries[0].state(), "running");
        assert_eq!(entries[0].wait_minutes(), 0);
        assert_eq!(entries[0].line_count(), 3);
        assert_eq!(entries[0].trace_text(), "main.main()\n\t/src/main.go:10 +0x1d\n");

        assert_eq!(entries[1].id(), 2);
        assert_eq!(entries[1].state(), "select");
        assert_eq!(entries[1].wait_minutes(), 15);
        assert_eq!(entries[1].header(), "goroutine 2 [select, 15 minutes]:");
        assert_eq!(entries[1].caller_digests().len(), 2);
    }

    #[test]
    fn noise_outside_blocks_is_ignored() {
        let text = "\
panic: something went wrong

goroutine 4 [chan receive]:
main.wait()
\t/src/wait.go:1
exit status 2
";
        let dump = parse_str(text).unwrap();
        assert_eq!(dump.len(), 1);
        // the trailing line is still inside the open block
        assert_eq!(dump.entries()[0].line_count(), 4);
    }

    #[test]
    fn header_without_blank_separator_closes_previous_block() {
        let text = "\
goroutine 1 [running]:
main.a()
goroutine 2 [running]:
main.b()";
        let dump = parse_str(text).unwrap();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump.entries()[0].trace_text(), "main.a()\n");
        assert_eq!(dump.entries()[1].trace_text(), "main.b()\n");
    }

    #[test]
    fn header_must_match_exactly() {
        let text = "\
Goroutine 1 [running]:
goroutine 2 [running]
goroutine x [running]:
 goroutine 3 [running]:
";
        assert!(parse_str(text).unwrap().is_empty());
    }

    #[test]
    fn unparseable_id_aborts_load() {
        let text = "goroutine 1 [running]:\nmain.a()\n\ngoroutine 99999999999999999999999 [running]:\n";
        let err = parse_str(text).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 4, .. }));
    }

    #[test]
    fn non_ascii_digits_are_a_parse_error() {
        let err = parse_str("goroutine ١٢ [running]:").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    #[test]
    fn reader_errors_propagate() {
        struct Broken;
        impl io::Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk on fire"))
            }
        }
        let err = parse_reader(io::BufReader::new(Broken)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn empty_brackets_give_empty_state() {
        let dump = parse_str("goroutine 3 []:\n").unwrap();
        assert_eq!(dump.entries()[0].state(), "");
    }
}
