use thiserror::Error;

/// Errors that can occur when operating on a [`LendingPool`][crate::LendingPool] or a
/// [`Lease`][crate::Lease].
///
/// An exhausted pool is not an error. Acquisition methods that can come back empty-handed return
/// an empty [`Lease`][crate::Lease] instead, which the caller checks via
/// [`Lease::is_leased()`][crate::Lease::is_leased].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The allocation strategy could not provide storage for the requested number of slots.
    #[error("failed to allocate storage for {slots} slots ({bytes} bytes)")]
    AllocationFailed {
        /// Number of slots that were requested from the allocation strategy.
        slots: usize,

        /// Size of the requested storage block in bytes.
        bytes: usize,
    },

    /// The requested capacity cannot be represented in memory.
    #[error("requested pool capacity exceeds the maximum representable size")]
    CapacityOverflow,

    /// A resize attempted to destroy slots that are currently lent out.
    #[error(
        "cannot shrink pool to {requested} objects: {leased_above} objects at or above that index are leased"
    )]
    ShrinkBelowLeased {
        /// The object count the caller asked the pool to shrink to.
        requested: usize,

        /// How many of the objects that would have been destroyed are currently leased.
        leased_above: usize,
    },

    /// The operation requires that no objects are lent out but some still are.
    #[error("operation requires an idle pool but {leased} objects are leased")]
    InUse {
        /// Number of objects currently lent out.
        leased: usize,
    },

    /// The lease does not hold an object.
    #[error("lease does not hold an object")]
    EmptyLease,
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`PoolError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolError: Send, Sync, Debug);

    #[test]
    fn messages_carry_details() {
        let error = PoolError::ShrinkBelowLeased {
            requested: 3,
            leased_above: 2,
        };

        let message = error.to_string();
        assert!(message.contains("shrink pool to 3"));
        assert!(message.contains("2 objects"));

        let error = PoolError::AllocationFailed {
            slots: 16,
            bytes: 128,
        };
        assert_eq!(
            error.to_string(),
            "failed to allocate storage for 16 slots (128 bytes)"
        );
    }

    #[test]
    fn usable_as_result_error() {
        let result: Result<()> = Err(PoolError::EmptyLease);
        assert!(matches!(result, Err(PoolError::EmptyLease)));
    }
}
