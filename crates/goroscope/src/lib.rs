//! Analysis engine for Go goroutine dumps.
//!
//! Parse a dump into a [`Dump`], then slice it with conditions, collapse
//! identical stacks, diff it against another capture, or look for goroutine
//! pairs that take the same locks in opposite order.
//!
//! ```
//! let text = "goroutine 1 [running]:\nmain.main()\n\t/src/main.go:10 +0x1d\n";
//! let mut dump = goroscope::parse_str(text)?;
//! let report = dump.keep("state == 'running' && lines > 1")?;
//! assert_eq!(report.kept, 1);
//! # Ok::<(), goroscope::Error>(())
//! ```
//!
//! Everything here is single-threaded: entries are shared between dumps
//! through `Rc`, see [`dump`] for what that means for deduplication.

pub mod condition;
pub mod deadlock;
pub mod digest;
pub mod dump;
pub mod entry;
pub mod error;
pub mod parse;
pub mod render;

pub use condition::Condition;
pub use deadlock::has_deadlock;
pub use digest::TraceDigest;
pub use dump::{
    DeadlockSuspect, DedupReport, Diff, DiffReport, Dump, FilterReport, SearchPage, StateCount,
    Summary,
};
pub use entry::{Duplicate, Entry, EntryBuilder, LockScan};
pub use error::{Error, EvalError, Result};
pub use parse::{Parser, parse_lines, parse_reader, parse_str};
pub use render::{entry_lines, header_line, write_entry};
