//! Cache Values
//!
//! Outcome of a tiered lookup. An absent lookup is modelled as `None` at the
//! call site; a present lookup is a `CacheValue`, which may itself be empty
//! when the source confirmed there is nothing to cache.

/// A present cache lookup result.
///
/// `CacheValue::empty()` is the negative-cache sentinel: "checked, the source
/// had nothing". It is only produced when negative caching is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue<V> {
    value: Option<V>,
}

impl<V> CacheValue<V> {
    /// A present value.
    pub fn of(value: V) -> Self {
        Self { value: Some(value) }
    }

    /// The negative-cache sentinel.
    pub fn empty() -> Self {
        Self { value: None }
    }

    /// Whether an underlying value is present.
    #[inline]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Borrow the underlying value, if any.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Take the underlying value, if any.
    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Map the underlying value, keeping emptiness.
    pub fn map<U, F: FnOnce(V) -> U>(self, f: F) -> CacheValue<U> {
        CacheValue {
            value: self.value.map(f),
        }
    }
}

impl<V> From<Option<V>> for CacheValue<V> {
    fn from(value: Option<V>) -> Self {
        Self { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_value() {
        let v = CacheValue::of(7);
        assert!(v.has_value());
        assert_eq!(v.value(), Some(&7));
        assert_eq!(v.into_value(), Some(7));
    }

    #[test]
    fn test_empty_sentinel() {
        let v: CacheValue<u32> = CacheValue::empty();
        assert!(!v.has_value());
        assert_eq!(v.value(), None);
        assert_eq!(v, CacheValue::from(None));
    }

    #[test]
    fn test_map_keeps_emptiness() {
        let empty: CacheValue<u32> = CacheValue::empty();
        assert!(!empty.map(|v| v * 2).has_value());
        assert_eq!(CacheValue::of(2).map(|v| v * 2).into_value(), Some(4));
    }
}
