//! Slot and prefix allocation for newly-declared concrete fields.
//!
//! The exact hash used by the original engine for slot allocation is one
//! of spec.md's documented Open Questions; this reconstructs a
//! deterministic, collision-resolved allocator rather than guessing at an
//! undocumented internal hash — see `DESIGN.md`.

use fxhash::hash64;

/// Derives a slot for `path`, linearly probing (re-hashing) until a value
/// absent from `taken` is found. Deterministic for a given path and set of
/// prior allocations, so replaying the same writes yields the same slots.
pub fn allocate_slot(path: &str, taken: impl Fn(u32) -> bool) -> u32 {
    let mut seed = hash64(path.as_bytes());
    loop {
        let candidate = seed as u32;
        if !taken(candidate) {
            return candidate;
        }
        seed = hash64(&seed.to_le_bytes());
    }
}

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Builds a short alphabetic code for one path segment from its hash,
/// re-hashing on collision. `taken` is checked against the *accumulated*
/// prefix (parent bytes plus this candidate code), not the bare code, so
/// a collision with another field's full compound prefix is actually
/// detected regardless of how many segments each path has.
fn segment_code(segment: &str, parent_prefix: &[u8], taken: &impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut seed = hash64(segment.as_bytes()) ^ hash64(parent_prefix);
    loop {
        let code = [
            ALPHABET[(seed % 26) as usize],
            ALPHABET[((seed / 26) % 26) as usize],
        ];
        let mut candidate = parent_prefix.to_vec();
        candidate.extend_from_slice(&code);
        if !taken(&candidate) {
            return code.to_vec();
        }
        seed = hash64(&seed.to_le_bytes());
    }
}

/// Builds the compound prefix for `path` by accumulating a per-segment
/// code onto the parent's prefix, from the root down. Each segment is
/// re-derived until the prefix accumulated so far (not just the new
/// segment's own code) is absent from `taken`, so two distinct
/// multi-segment paths can never be assigned the same final prefix.
pub fn allocate_prefix(path: &str, taken: impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut prefix = Vec::new();
    for segment in xapi_flatten::path_segments(path) {
        let code = segment_code(segment, &prefix, &taken);
        prefix.extend(code);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn slot_allocation_avoids_collisions() {
        let mut taken: HashSet<u32> = HashSet::new();
        for path in ["a", "a.b", "a.c", "x.y.z", "name", "age"] {
            let slot = allocate_slot(path, |s| taken.contains(&s));
            assert!(taken.insert(slot), "slot {slot} reused for {path}");
        }
    }

    #[test]
    fn prefix_allocation_is_deterministic() {
        let p1 = allocate_prefix("a.b", |_| false);
        let p2 = allocate_prefix("a.b", |_| false);
        assert_eq!(p1, p2);
        assert!(!p1.is_empty());
    }

    #[test]
    fn multi_segment_prefix_allocation_avoids_collisions() {
        let mut taken: HashSet<Vec<u8>> = HashSet::new();
        for path in ["a.b", "a.c", "x.y.z", "x.y.w", "product.color", "variant.color"] {
            let prefix = allocate_prefix(path, |p| taken.contains(p));
            assert!(taken.insert(prefix.clone()), "prefix {prefix:?} reused for {path}");
        }
    }
}
