//! Cache lookup result type

use super::entry::CacheValue;

/// Result of a read through the tier chain.
///
/// Freshness is part of the result, not the value: stale, fallback and
/// partial reads carry the same payload a fresh hit would, tagged so the
/// caller can decide whether to accept degraded data.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Fresh hit from some tier
    Hit(CacheValue),
    /// Value read past its freshness policy while the source of truth
    /// was failing
    Stale(CacheValue),
    /// Value served because the circuit breaker refused remote traffic
    Fallback(CacheValue),
    /// Value accepted despite failing required-field validation
    Partial(CacheValue),
    /// Absent on every reachable tier
    Miss,
}

impl Lookup {
    /// Fresh hit?
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Any value at all, fresh or degraded?
    pub fn is_usable(&self) -> bool {
        !matches!(self, Lookup::Miss)
    }

    /// Degraded (stale, fallback or partial)?
    pub fn is_degraded(&self) -> bool {
        matches!(self, Lookup::Stale(_) | Lookup::Fallback(_) | Lookup::Partial(_))
    }

    /// Extract the value, consuming the result
    pub fn value(self) -> Option<CacheValue> {
        match self {
            Lookup::Hit(v) | Lookup::Stale(v) | Lookup::Fallback(v) | Lookup::Partial(v) => Some(v),
            Lookup::Miss => None,
        }
    }

    /// Borrow the value, if any
    pub fn value_ref(&self) -> Option<&CacheValue> {
        match self {
            Lookup::Hit(v) | Lookup::Stale(v) | Lookup::Fallback(v) | Lookup::Partial(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}
