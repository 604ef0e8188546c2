//! Version <-> backend offset mapping for snapshots.
//!
//! Snapshots are addressed by the stream version they summarize, but a backend
//! may only be able to key the stored snapshot record by its own offset. The
//! mapping must be deterministic and collision-free in both directions so that
//! "latest snapshot, then events after its version" stays correct.

use sourcebook_core::{CoreError, CoreResult};

pub trait OffsetMapping: Send + Sync + core::fmt::Debug {
    fn to_offset(&self, version: u64) -> CoreResult<u64>;

    fn to_version(&self, offset: u64) -> CoreResult<u64>;
}

/// Zero-based stream revisions: version `n` lives at offset `n - 1`.
#[derive(Debug, Copy, Clone, Default)]
pub struct StreamRevisionMapping;

impl OffsetMapping for StreamRevisionMapping {
    fn to_offset(&self, version: u64) -> CoreResult<u64> {
        version
            .checked_sub(1)
            .ok_or_else(|| CoreError::validation("snapshot version must be at least 1"))
    }

    fn to_version(&self, offset: u64) -> CoreResult<u64> {
        offset
            .checked_add(1)
            .ok_or_else(|| CoreError::validation(format!("snapshot offset {offset} is out of range")))
    }
}

/// Backends that key snapshots by version directly.
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityMapping;

impl OffsetMapping for IdentityMapping {
    fn to_offset(&self, version: u64) -> CoreResult<u64> {
        Ok(version)
    }

    fn to_version(&self, offset: u64) -> CoreResult<u64> {
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn revision_mapping_rejects_version_zero() {
        assert!(StreamRevisionMapping.to_offset(0).is_err());
        assert_eq!(StreamRevisionMapping.to_offset(1).unwrap(), 0);
        assert_eq!(StreamRevisionMapping.to_version(0).unwrap(), 1);
        assert!(StreamRevisionMapping.to_version(u64::MAX).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn revision_mapping_is_a_bijection(a in 1u64..u64::MAX, b in 1u64..u64::MAX) {
            let m = StreamRevisionMapping;
            let oa = m.to_offset(a).unwrap();
            prop_assert_eq!(m.to_version(oa).unwrap(), a);
            if a != b {
                prop_assert_ne!(oa, m.to_offset(b).unwrap());
            }
        }

        #[test]
        fn identity_mapping_round_trips(v in any::<u64>()) {
            let m = IdentityMapping;
            prop_assert_eq!(m.to_version(m.to_offset(v).unwrap()).unwrap(), v);
        }
    }
}
