//! One goroutine's captured state.
//!
//! An entry is assembled line by line through an [`EntryBuilder`] while the
//! parser is inside its block, then sealed with [`EntryBuilder::finish`].
//! A sealed [`Entry`] never changes again, except for the `duplicates`
//! list that deduplication writes on the surviving representative.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::sync::OnceLock;

use facet::Facet;
use regex::Regex;

use crate::digest::{TraceDigest, TraceHasher};

/// Substring of a caller line that marks a lock acquisition.
const LOCK_MARKER: &str = ".Lock";

fn short_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\*[0-9A-Za-z_]+").expect("short type pattern is valid")
    })
}

/// Goroutine id and wait time of an entry folded into a representative.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Duplicate {
    pub id: u64,
    pub wait_minutes: u64,
}

impl fmt::Display for Duplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.wait_minutes)
    }
}

/// Where the lock-holder scan stands within one trace.
///
/// Starts `Idle`, flips to `Holding` on the first caller line that acquires
/// a lock and stays there for the rest of the trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockScan {
    #[default]
    Idle,
    Holding,
}

impl LockScan {
    /// Next scan state after seeing `caller`.
    pub fn observe(self, caller: &str) -> Self {
        match self {
            Self::Idle if caller.contains(LOCK_MARKER) => Self::Holding,
            state => state,
        }
    }
}

/// First `*TypeName` token of a caller line, e.g. `*Mutex` in
/// `sync.(*Mutex).Lock(0xc000010000)`.
pub fn short_type_name(caller: &str) -> Option<&str> {
    short_type_pattern().find(caller).map(|m| m.as_str())
}

/// Location part of a call-site line: `\t/src/x.go:12 +0x1d` gives
/// `/src/x.go:12`.
fn call_site_location(line: &str) -> &str {
    line.split(' ').next().unwrap_or_default().trim()
}

/// An entry still being read from its block.
#[derive(Clone)]
pub struct EntryBuilder {
    id: u64,
    header: String,
    annotations: Vec<String>,
    wait_minutes: u64,
    line_count: usize,
    buf: String,
    caller_digests: Vec<TraceDigest>,
    hasher: TraceHasher,
    lock_scan: LockScan,
    lock_holders: Vec<String>,
}

impl EntryBuilder {
    /// Starts an entry from its header line. `annotations` are the trimmed
    /// comma-separated fields between the header's brackets.
    pub fn new(id: u64, header: impl Into<String>, annotations: Vec<String>) -> Self {
        let wait_minutes = annotations
            .get(1)
            .and_then(|field| parse_wait_minutes(field))
            .unwrap_or(0);
        Self {
            id,
            header: header.into(),
            annotations,
            wait_minutes,
            line_count: 1,
            buf: String::new(),
            caller_digests: Vec::new(),
            hasher: TraceHasher::default(),
            lock_scan: LockScan::Idle,
            lock_holders: Vec::new(),
        }
    }

    pub fn lock_scan(&self) -> LockScan {
        self.lock_scan
    }

    /// Appends one body line.
    ///
    /// Tab-prefixed lines are call-site lines and only feed the digests.
    /// Every other line is a caller line and only feeds the lock-holder scan.
    pub fn add_line(&mut self, line: &str) {
        self.line_count += 1;
        self.buf.push_str(line);
        self.buf.push('\n');

        if line.starts_with('\t') {
            let location = call_site_location(line);
            self.caller_digests.push(TraceDigest::of(location));
            self.hasher.update(location);
        } else {
            self.lock_scan = self.lock_scan.observe(line);
            if self.lock_scan == LockScan::Holding
                && let Some(holder) = short_type_name(line)
            {
                self.lock_holders.push(holder.to_owned());
            }
        }
    }

    /// Seals the entry.
    pub fn finish(self) -> Entry {
        let state = self.annotations.first().cloned().unwrap_or_default();
        Entry {
            id: self.id,
            header: self.header,
            state,
            annotations: self.annotations,
            wait_minutes: self.wait_minutes,
            line_count: self.line_count,
            trace_text: self.buf,
            caller_digests: self.caller_digests,
            full_digest: self.hasher.finish(),
            lock_holders: self.lock_holders,
            duplicates: RefCell::new(Vec::new()),
        }
    }
}

/// `"15 minutes"` gives 15. Anything else, including overflow, gives `None`.
fn parse_wait_minutes(field: &str) -> Option<u64> {
    let digits = field.strip_suffix(" minutes")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// A sealed goroutine entry.
pub struct Entry {
    id: u64,
    header: String,
    state: String,
    annotations: Vec<String>,
    wait_minutes: u64,
    line_count: usize,
    trace_text: String,
    caller_digests: Vec<TraceDigest>,
    full_digest: TraceDigest,
    lock_holders: Vec<String>,
    duplicates: RefCell<Vec<Duplicate>>,
}

impl Entry {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The header line exactly as captured.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// First bracketed annotation, e.g. `running` or `IO wait`.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn wait_minutes(&self) -> u64 {
        self.wait_minutes
    }

    /// Number of lines in the block, header included.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Body lines, each terminated by `\n`.
    pub fn trace_text(&self) -> &str {
        &self.trace_text
    }

    pub fn caller_digests(&self) -> &[TraceDigest] {
        &self.caller_digests
    }

    /// Identifies the stack shape: equal digests mean equal call-site
    /// sequences.
    pub fn full_digest(&self) -> TraceDigest {
        self.full_digest
    }

    pub fn lock_holders(&self) -> &[String] {
        &self.lock_holders
    }

    pub fn duplicates(&self) -> Ref<'_, Vec<Duplicate>> {
        self.duplicates.borrow()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.borrow().len()
    }

    pub fn as_duplicate(&self) -> Duplicate {
        Duplicate {
            id: self.id,
            wait_minutes: self.wait_minutes,
        }
    }

    pub(crate) fn set_duplicates(&self, duplicates: Vec<Duplicate>) {
        *self.duplicates.borrow_mut() = duplicates;
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("wait_minutes", &self.wait_minutes)
            .field("line_count", &self.line_count)
            .field("full_digest", &self.full_digest)
            .field("lock_holders", &self.lock_holders)
            .field("duplicates", &self.duplicates.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(annotations: &[&str]) -> EntryBuilder {
        EntryBuilder::new(
            7,
            "goroutine 7 [...]:",
            annotations.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn wait_minutes_only_from_exact_shape() {
        assert_eq!(builder(&["select", "15 minutes"]).finish().wait_minutes(), 15);
        assert_eq!(builder(&["select", "1 minute"]).finish().wait_minutes(), 0);
        assert_eq!(builder(&["select", "locked to thread"]).finish().wait_minutes(), 0);
        assert_eq!(builder(&["select", "-3 minutes"]).finish().wait_minutes(), 0);
        assert_eq!(builder(&["select"]).finish().wait_minutes(), 0);
        assert_eq!(
            builder(&["select", "99999999999999999999999 minutes"])
                .finish()
                .wait_minutes(),
            0
        );
    }

    #[test]
    fn state_is_first_annotation() {
        let entry = builder(&["IO wait", "3 minutes"]).finish();
        assert_eq!(entry.state(), "IO wait");
        assert_eq!(entry.annotations(), ["IO wait", "3 minutes"]);
    }

    #[test]
    fn call_site_lines_feed_digests_only() {
        let mut b = builder(&["running"]);
        b.add_line("main.(*Server).Lock(0xc000123)");
        b.add_line("\t/src/server.go:10 +0x1d");
        b.add_line("\t/src/server.go:20 +0x2e");
        assert_eq!(b.lock_scan(), LockScan::Holding);
        let entry = b.finish();

        assert_eq!(entry.line_count(), 4);
        assert_eq!(entry.caller_digests().len(), 2);
        assert_eq!(entry.caller_digests()[0], TraceDigest::of("/src/server.go:10"));
        assert_eq!(entry.lock_holders(), ["*Server"]);
        assert_eq!(
            entry.trace_text(),
            "main.(*Server).Lock(0xc000123)\n\t/src/server.go:10 +0x1d\n\t/src/server.go:20 +0x2e\n"
        );
    }

    #[test]
    fn digest_ignores_offsets_and_caller_lines() {
        let mut a = builder(&["running"]);
        a.add_line("main.work(0x1)");
        a.add_line("\t/src/work.go:5 +0x10");
        let mut b = builder(&["running"]);
        b.add_line("main.work(0x2)");
        b.add_line("\t/src/work.go:5 +0x99");
        assert_eq!(a.finish().full_digest(), b.finish().full_digest());
    }

    #[test]
    fn lock_scan_is_sticky_and_skips_call_sites() {
        let mut b = builder(&["semacquire"]);
        b.add_line("main.(*Before).Run()");
        b.add_line("sync.(*Mutex).Lock(...)");
        b.add_line("\t/usr/lib/go/src/sync/mutex.go:90");
        b.add_line("main.(*Account).Withdraw(0xc0001)");
        b.add_line("\t/src/account.go:12 +0x44");
        b.add_line("main.plain(0x0)");
        b.add_line("main.(*Bank).Transfer(0xc0002)");
        let entry = b.finish();
        assert_eq!(entry.lock_holders(), ["*Mutex", "*Account", "*Bank"]);
    }

    #[test]
    fn holder_names_stop_at_non_ascii() {
        assert_eq!(short_type_name("main.(*Café).Lock(0xc0001)"), Some("*Caf"));
        assert_eq!(short_type_name("main.(*Σ).Run()"), None);
        assert_eq!(short_type_name("main.(*cache_2).Get()"), Some("*cache_2"));
    }

    #[test]
    fn no_lock_marker_means_no_holders() {
        let mut b = builder(&["running"]);
        b.add_line("main.(*Account).Withdraw(0xc0001)");
        b.add_line("\tmain.(*Mutex).Lock at a call site does not count");
        assert!(b.finish().lock_holders().is_empty());
    }

    #[test]
    fn duplicates_start_empty() {
        let entry = builder(&["running"]).finish();
        assert_eq!(entry.duplicate_count(), 0);
        entry.set_duplicates(vec![entry.as_duplicate()]);
        assert_eq!(*entry.duplicates(), [Duplicate { id: 7, wait_minutes: 0 }]);
    }
}
