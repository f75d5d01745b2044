//! Lock-order inversion heuristic.
//!
//! Two goroutines are suspicious when they share two lock-holder type names
//! `T` and `U` in opposite order: `U` comes before `T` in the first trace but
//! after `T` in the second. Only type-name text is compared, never
//! addresses, so distinct instances of the same type look identical and
//! false positives are expected.

use crate::entry::Entry;

pub fn has_deadlock(a: &Entry, b: &Entry) -> bool {
    holders_inverted(a.lock_holders(), b.lock_holders())
}

/// Core of [`has_deadlock`] over raw lock-holder sequences.
pub fn holders_inverted<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    for (i, t) in a.iter().enumerate() {
        let t = t.as_ref();
        for (j, _) in b.iter().enumerate().filter(|(_, h)| h.as_ref() == t) {
            let before_in_a = &a[..i];
            let after_in_b = &b[j + 1..];
            let inverted = after_in_b.iter().map(AsRef::as_ref).any(|u| {
                u != t && before_in_a.iter().any(|earlier| earlier.as_ref() == u)
            });
            if inverted {
                return true;
            }
        }
    }
    false
}
