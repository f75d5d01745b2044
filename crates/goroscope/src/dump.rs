//! A loaded or derived goroutine dump.
//!
//! Entries are shared, not copied: `copy`, `search` and `diff` hand out
//! clones of the same `Rc<Entry>`. Deduplication writes the `duplicates`
//! list of each surviving entry in place, so the result is visible through
//! every dump that holds that entry.

use std::collections::hash_map::Entry as Slot;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use facet::Facet;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::deadlock::has_deadlock;
use crate::digest::TraceDigest;
use crate::entry::{Duplicate, Entry};
use crate::error::EvalError;

/// Outcome of an in-place `delete` or `keep`.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterReport {
    pub deleted: usize,
    pub kept: usize,
}

#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub total_before: usize,
    pub kept: usize,
}

#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct StateCount {
    pub state: String,
    pub count: usize,
}

/// Entry count overall and per state. States are sorted lexicographically.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub states: Vec<StateCount>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# of goroutines: {}", self.total)?;
        if !self.states.is_empty() {
            writeln!(f)?;
            for StateCount { state, count } in &self.states {
                writeln!(f, "{state:>15}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Pair of entries whose lock-holder sequences are inverted.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlockSuspect {
    pub first: u64,
    pub second: u64,
}

/// One page of `search` results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Number of entries matching the condition, across all pages.
    pub matched: usize,
    pub entries: Vec<Rc<Entry>>,
}

/// Three-way split of two dumps by goroutine id.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub left_only: Dump,
    /// Entries present on both sides, taken from the right-hand dump.
    pub common: Dump,
    pub right_only: Dump,
}

/// Ids in each part of a [`Diff`].
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub left_only: Vec<u64>,
    pub common: Vec<u64>,
    pub right_only: Vec<u64>,
}

impl Diff {
    pub fn report(&self) -> DiffReport {
        DiffReport {
            left_only: self.left_only.ids(),
            common: self.common.ids(),
            right_only: self.right_only.ids(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Dump {
    entries: Vec<Rc<Entry>>,
}

impl Dump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Rc<Entry>>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: Rc<Entry>) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Rc<Entry>] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Entry>> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.id()).collect()
    }

    /// Evaluates `condition` on every entry, in order. Fails on the first
    /// entry that cannot be evaluated.
    fn matches(&self, condition: &Condition) -> Result<Vec<bool>, EvalError> {
        self.entries
            .iter()
            .map(|entry| condition.evaluate(entry))
            .collect()
    }

    /// New dump sharing the entries that satisfy `condition`. An empty
    /// condition shares every entry.
    pub fn copy(&self, condition: &str) -> Result<Dump, EvalError> {
        if condition.trim().is_empty() {
            return Ok(self.clone());
        }
        let condition = Condition::parse(condition)?;
        let matches = self.matches(&condition)?;
        let entries = self
            .entries
            .iter()
            .zip(matches)
            .filter_map(|(entry, hit)| hit.then(|| Rc::clone(entry)))
            .collect::<Vec<_>>();
        debug!(condition = %condition, copied = entries.len(), "copied dump");
        Ok(Dump { entries })
    }

    /// Removes every entry that satisfies `condition`.
    pub fn delete(&mut self, condition: &str) -> Result<FilterReport, EvalError> {
        let condition = Condition::parse(condition)?;
        let matches = self.matches(&condition)?;
        Ok(self.retain_flags(matches.into_iter().map(|hit| !hit), &condition))
    }

    /// Removes every entry that does not satisfy `condition`.
    pub fn keep(&mut self, condition: &str) -> Result<FilterReport, EvalError> {
        let condition = Condition::parse(condition)?;
        let matches = self.matches(&condition)?;
        Ok(self.retain_flags(matches, &condition))
    }

    fn retain_flags(
        &mut self,
        keep: impl IntoIterator<Item = bool>,
        condition: &Condition,
    ) -> FilterReport {
        let before = self.entries.len();
        let mut keep = keep.into_iter();
        self.entries.retain(|_| keep.next().unwrap_or(false));
        let report = FilterReport {
            deleted: before - self.entries.len(),
            kept: self.entries.len(),
        };
        info!(
            condition = %condition,
            deleted = report.deleted,
            kept = report.kept,
            "filtered dump"
        );
        report
    }

    /// Entries satisfying `condition` whose rank among the matches lies in
    /// `offset..offset + limit`.
    pub fn search(
        &self,
        condition: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, EvalError> {
        let condition = Condition::parse(condition)?;
        let matches = self.matches(&condition)?;
        let hits = self
            .entries
            .iter()
            .zip(matches)
            .filter_map(|(entry, hit)| hit.then_some(entry));
        let mut matched = 0;
        let mut entries = Vec::new();
        for entry in hits {
            if matched >= offset && matched - offset < limit {
                entries.push(Rc::clone(entry));
            }
            matched += 1;
        }
        debug!(condition = %condition, matched, offset, limit, "searched dump");
        Ok(SearchPage { matched, entries })
    }

    /// Raw entries `offset..offset + limit`, clamped to the dump.
    pub fn show(&self, offset: usize, limit: usize) -> &[Rc<Entry>] {
        let start = offset.min(self.entries.len());
        let end = offset.saturating_add(limit).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Collapses entries with identical call-site sequences.
    ///
    /// The first entry of each digest, in dump order, survives and receives
    /// the ids and wait times of its whole group. Entries that already carry
    /// duplicates from an earlier pass contribute those instead of
    /// themselves, so running this twice changes nothing. A group lists each
    /// goroutine id once, even when dumps sharing these entries were
    /// deduplicated before.
    pub fn dedup(&mut self) -> DedupReport {
        let total_before = self.entries.len();
        let mut groups: Vec<DedupGroup> = Vec::new();
        let mut by_digest: HashMap<TraceDigest, usize> = HashMap::new();

        for entry in &self.entries {
            let index = match by_digest.entry(entry.full_digest()) {
                Slot::Occupied(slot) => *slot.get(),
                Slot::Vacant(slot) => {
                    slot.insert(groups.len());
                    groups.push(DedupGroup::new(Rc::clone(entry)));
                    groups.len() - 1
                }
            };
            let group = &mut groups[index];
            let existing = entry.duplicates();
            if existing.is_empty() {
                group.absorb(entry.as_duplicate());
            } else {
                existing.iter().for_each(|dup| group.absorb(*dup));
            }
        }

        self.entries = groups
            .into_iter()
            .map(|group| {
                group.representative.set_duplicates(group.members);
                group.representative
            })
            .collect();

        let report = DedupReport {
            total_before,
            kept: self.entries.len(),
        };
        info!(
            total_before = report.total_before,
            kept = report.kept,
            "deduplicated dump"
        );
        report
    }

    /// Splits `self` and `other` by goroutine id. Left-only entries keep
    /// `self`'s order; common and right-only entries keep `other`'s.
    pub fn diff(&self, other: &Dump) -> Diff {
        let left_ids: HashSet<u64> = self.entries.iter().map(|e| e.id()).collect();
        let right_ids: HashSet<u64> = other.entries.iter().map(|e| e.id()).collect();

        let left_only = self
            .entries
            .iter()
            .filter(|e| !right_ids.contains(&e.id()))
            .cloned()
            .collect();
        let (common, right_only): (Vec<_>, Vec<_>) = other
            .entries
            .iter()
            .cloned()
            .partition(|e| left_ids.contains(&e.id()));

        let diff = Diff {
            left_only: Dump::from_entries(left_only),
            common: Dump::from_entries(common),
            right_only: Dump::from_entries(right_only),
        };
        debug!(
            left_only = diff.left_only.len(),
            common = diff.common.len(),
            right_only = diff.right_only.len(),
            "diffed dumps"
        );
        diff
    }

    pub fn summary(&self) -> Summary {
        let mut states: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &self.entries {
            *states.entry(entry.state()).or_default() += 1;
        }
        Summary {
            total: self.entries.len(),
            states: states
                .into_iter()
                .map(|(state, count)| StateCount {
                    state: state.to_owned(),
                    count,
                })
                .collect(),
        }
    }

    /// Every pair of entries, in dump order, whose lock-holder sequences
    /// are inverted.
    pub fn deadlock_suspects(&self) -> Vec<DeadlockSuspect> {
        let mut suspects = Vec::new();
        for (i, first) in self.entries.iter().enumerate() {
            if first.lock_holders().is_empty() {
                continue;
            }
            for second in &self.entries[i + 1..] {
                if has_deadlock(first, second) {
                    suspects.push(DeadlockSuspect {
                        first: first.id(),
                        second: second.id(),
                    });
                }
            }
        }
        if !suspects.is_empty() {
            info!(pairs = suspects.len(), "found lock-order inversions");
        }
        suspects
    }
}

/// Entries sharing one digest while `dedup` runs.
struct DedupGroup {
    representative: Rc<Entry>,
    members: Vec<Duplicate>,
    seen: HashSet<u64>,
}

impl DedupGroup {
    fn new(representative: Rc<Entry>) -> Self {
        Self {
            representative,
            members: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn absorb(&mut self, dup: Duplicate) {
        if self.seen.insert(dup.id) {
            self.members.push(dup);
        }
    }
}

impl fmt::Debug for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dump").field("ids", &self.ids()).finish()
    }
}

impl<'a> IntoIterator for &'a Dump {
    type Item = &'a Rc<Entry>;
    type IntoIter = std::slice::Iter<'a, Rc<Entry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
