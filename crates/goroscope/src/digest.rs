use std::fmt;

use sha2::{Digest as _, Sha256};

/// Content digest of one or more call-site locations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceDigest([u8; 32]);

impl TraceDigest {
    /// Digest of a single call-site location.
    pub fn of(location: &str) -> Self {
        Self(Sha256::digest(location.as_bytes()).into())
    }
}

impl fmt::Display for TraceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TraceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 bytes are plenty to tell traces apart in test output
        write!(f, "TraceDigest(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Running digest over every call-site location of a trace, in order.
#[derive(Clone, Default)]
pub(crate) struct TraceHasher {
    inner: Sha256,
}

impl TraceHasher {
    pub(crate) fn update(&mut self, location: &str) {
        self.inner.update(location.as_bytes());
    }

    pub(crate) fn finish(self) -> TraceDigest {
        TraceDigest(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hasher_is_order_sensitive() {
        let mut ab = TraceHasher::default();
        ab.update("a.go:1");
        ab.update("b.go:2");
        let mut ba = TraceHasher::default();
        ba.update("b.go:2");
        ba.update("a.go:1");
        assert_ne!(ab.finish(), ba.finish());
    }

    #[test]
    fn empty_trace_has_stable_digest() {
        assert_eq!(
            TraceHasher::default().finish(),
            TraceHasher::default().finish()
        );
        assert_eq!(
            TraceHasher::default().finish().to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_location_matches_running_hash() {
        let mut hasher = TraceHasher::default();
        hasher.update("/src/main.go:42");
        assert_eq!(hasher.finish(), TraceDigest::of("/src/main.go:42"));
    }
}
