//! Stable content hashing for [`EntityView`](crate::entity_view::EntityView).
//!
//! The refresh-entity handler uses this to decide whether a freshly fetched
//! view differs from the one already on record without diffing field by
//! field. It has to be stable across process restarts (unlike
//! [`std::collections::hash_map::DefaultHasher`], which reseeds per
//! process), so we hash a canonical serialization with a fixed-key SipHash
//! instead.

use siphasher::sip128::{Hasher128, SipHasher13};
use std::hash::Hasher as _;

use crate::entity_view::EntityView;

/// Fixed key so the hash is reproducible across runs and machines. Not a
/// security boundary — this is content-equality detection, not
/// authentication.
const HASH_KEY: (u64, u64) = (0x5A5A_444D_5245_504C, 0x4943_4154_4F52_0001);

/// Computes a 128-bit stable hash over a canonical view of `entity`.
///
/// `entity` is canonicalized internally, so callers don't need to sort
/// members/relations themselves before comparing hashes.
#[must_use]
pub fn entity_view_hash(entity: &EntityView) -> u128 {
    let canonical = entity.clone().canonicalized();
    let bytes = serde_json::to_vec(&canonical)
        .expect("EntityView serialization is infallible for in-memory values");

    let mut hasher = SipHasher13::new_with_keys(HASH_KEY.0, HASH_KEY.1);
    hasher.write(&bytes);
    hasher.finish128().as_u128()
}

#[cfg(test)]
mod tests {
    use super::entity_view_hash;
    use crate::entity_view::{EntityView, RelationView};
    use crate::ids::{EntityId, RecordKey};

    fn sample() -> EntityView {
        EntityView {
            entity_id: EntityId::new(42),
            entity_name: Some("ACME CORP".to_owned()),
            record_summary: None,
            members: vec![RecordKey::new("CUSTOMERS", "1"), RecordKey::new("WATCHLIST", "9")],
            relations: vec![RelationView {
                related_id: EntityId::new(7),
                match_level: 2,
                match_key: "NAME+DOB".to_owned(),
                principle: "CNAME".to_owned(),
            }],
        }
    }

    #[test]
    fn hash_is_stable_for_equal_content() {
        assert_eq!(entity_view_hash(&sample()), entity_view_hash(&sample()));
    }

    #[test]
    fn hash_is_order_independent() {
        let mut reordered = sample();
        reordered.members.reverse();
        assert_eq!(entity_view_hash(&sample()), entity_view_hash(&reordered));
    }

    #[test]
    fn hash_changes_with_content() {
        let mut changed = sample();
        changed.entity_name = Some("ACME CORPORATION".to_owned());
        assert_ne!(entity_view_hash(&sample()), entity_view_hash(&changed));
    }
}
