//! `MultiValueKeyMaker`: composes per-slot distance sub-keys into a single
//! byte string ordering search results, following the tagged-variant
//! capability set `{smallest, biggest, reverse}` prescribed for keymakers.

pub mod metric;

pub use metric::Metric;

use std::f64::consts::PI;

/// One document's multi-valued slots, as seen by the sort layer.
#[derive(Debug, Clone, Default)]
pub struct SortDocument {
    pub numbers: std::collections::BTreeMap<u32, Vec<f64>>,
    pub bools: std::collections::BTreeMap<u32, Vec<bool>>,
    pub strings: std::collections::BTreeMap<u32, Vec<String>>,
    /// `(lat, lon)` centroids, in radians.
    pub geos: std::collections::BTreeMap<u32, Vec<(f64, f64)>>,
    pub serialised: std::collections::BTreeMap<u32, Vec<Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub enum SubKey {
    Serialise { slot: u32, reverse: bool },
    Float { slot: u32, reverse: bool, reference: f64 },
    Integer { slot: u32, reverse: bool, reference: i64 },
    Positive { slot: u32, reverse: bool, reference: u64 },
    Date { slot: u32, reverse: bool, reference: f64 },
    Bool { slot: u32, reverse: bool, reference: bool },
    Geo { slot: u32, reverse: bool, reference: Vec<(f64, f64)> },
    StringMetric { slot: u32, reverse: bool, reference: String, metric: Metric },
}

impl SubKey {
    pub fn reverse(&self) -> bool {
        match self {
            SubKey::Serialise { reverse, .. }
            | SubKey::Float { reverse, .. }
            | SubKey::Integer { reverse, .. }
            | SubKey::Positive { reverse, .. }
            | SubKey::Date { reverse, .. }
            | SubKey::Bool { reverse, .. }
            | SubKey::Geo { reverse, .. }
            | SubKey::StringMetric { reverse, .. } => *reverse,
        }
    }

    /// The raw distance bytes for this sub-key against `doc`, before
    /// reverse-complementing/terminator framing.
    fn raw_key(&self, doc: &SortDocument) -> Vec<u8> {
        match self {
            SubKey::Serialise { slot, .. } => doc
                .serialised
                .get(slot)
                .and_then(|vs| vs.iter().min().cloned())
                .unwrap_or_default(),
            SubKey::Float { slot, reference, .. } => {
                float_key_bytes(min_abs_diff(doc.numbers.get(slot), *reference))
            }
            SubKey::Integer { slot, reference, .. } => {
                float_key_bytes(min_abs_diff(doc.numbers.get(slot), *reference as f64))
            }
            SubKey::Positive { slot, reference, .. } => {
                float_key_bytes(min_abs_diff(doc.numbers.get(slot), *reference as f64))
            }
            SubKey::Date { slot, reference, .. } => {
                float_key_bytes(min_abs_diff(doc.numbers.get(slot), *reference))
            }
            SubKey::Bool { slot, reference, .. } => {
                let distance = doc
                    .bools
                    .get(slot)
                    .map(|vs| if vs.contains(reference) { 0u8 } else { 1u8 })
                    .unwrap_or(1u8);
                vec![distance]
            }
            SubKey::Geo { slot, reference, .. } => {
                let angle = doc
                    .geos
                    .get(slot)
                    .map(|centroids| min_angle(reference, centroids))
                    .unwrap_or(PI);
                float_key_bytes(angle)
            }
            SubKey::StringMetric { slot, reference, metric, .. } => {
                let distance = doc
                    .strings
                    .get(slot)
                    .map(|vs| {
                        vs.iter()
                            .map(|v| metric.distance(reference, v))
                            .fold(f64::MAX, f64::min)
                    })
                    .unwrap_or(1.0);
                float_key_bytes(distance)
            }
        }
    }
}

fn min_abs_diff(values: Option<&Vec<f64>>, reference: f64) -> f64 {
    values
        .map(|vs| vs.iter().map(|v| (v - reference).abs()).fold(f64::MAX, f64::min))
        .unwrap_or(f64::MAX)
}

/// Great-circle angular distance (radians) between two `(lat, lon)`
/// points, minimised over every `(reference, candidate)` pair.
fn min_angle(references: &[(f64, f64)], candidates: &[(f64, f64)]) -> f64 {
    if candidates.is_empty() || references.is_empty() {
        return PI;
    }
    let mut best = PI;
    for &(lat1, lon1) in references {
        for &(lat2, lon2) in candidates {
            let d = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).cos())
                .clamp(-1.0, 1.0)
                .acos();
            best = best.min(d);
        }
    }
    best
}

/// A monotone byte encoding of a non-negative `f64` distance, preserving
/// numeric ordering under lexicographic byte comparison.
fn float_key_bytes(v: f64) -> Vec<u8> {
    let clamped = if v.is_finite() { v.max(0.0) } else { f64::MAX };
    clamped.to_be_bytes().to_vec()
}

/// Frames one sub-key's raw bytes: reverse sub-keys
/// complement every byte (`0x00 -> 0xFF 0x00`) and terminate with
/// `0xFF 0xFF`; forward sub-keys double any `0x00` byte and terminate
/// with `0x00 0x00`, except the last forward sub-key, which needs no
/// terminator.
fn frame(raw: &[u8], reverse: bool, is_last_forward: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    if reverse {
        for &b in raw {
            let complemented = !b;
            out.push(complemented);
            if complemented == 0x00 {
                out.push(0x00);
            }
        }
        out.push(0xFF);
        out.push(0xFF);
    } else {
        for &b in raw {
            out.push(b);
            if b == 0x00 {
                out.push(0x00);
            }
        }
        if !is_last_forward {
            out.push(0x00);
            out.push(0x00);
        }
    }
    out
}

/// Composes an ordered list of [`SubKey`]s into a single comparable byte
/// string per document.
pub struct MultiValueKeyMaker {
    pub sub_keys: Vec<SubKey>,
}

impl MultiValueKeyMaker {
    pub fn new(sub_keys: Vec<SubKey>) -> Self {
        MultiValueKeyMaker { sub_keys }
    }

    pub fn key_for(&self, doc: &SortDocument) -> Vec<u8> {
        // Only the literal last sub-key can skip its terminator, and
        // only when that sub-key itself is forward: a forward sub-key
        // followed by anything else (reverse or not) still needs one,
        // since the bytes after it must stay distinguishable.
        let last_forward_index = match self.sub_keys.last() {
            Some(k) if !k.reverse() => Some(self.sub_keys.len() - 1),
            _ => None,
        };

        let mut out = Vec::new();
        for (i, sub_key) in self.sub_keys.iter().enumerate() {
            let raw = sub_key.raw_key(doc);
            let is_last_forward = !sub_key.reverse() && Some(i) == last_forward_index;
            out.extend(frame(&raw, sub_key.reverse(), is_last_forward));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_numbers(slot: u32, values: &[f64]) -> SortDocument {
        let mut doc = SortDocument::default();
        doc.numbers.insert(slot, values.to_vec());
        doc
    }

    #[test]
    fn float_key_orders_by_distance() {
        let maker = MultiValueKeyMaker::new(vec![SubKey::Float { slot: 0, reverse: false, reference: 30.0 }]);
        let close = maker.key_for(&doc_with_numbers(0, &[31.0]));
        let far = maker.key_for(&doc_with_numbers(0, &[50.0]));
        assert!(close < far);
    }

    #[test]
    fn reverse_subkey_inverts_ordering() {
        let maker = MultiValueKeyMaker::new(vec![SubKey::Float { slot: 0, reverse: true, reference: 30.0 }]);
        let close = maker.key_for(&doc_with_numbers(0, &[31.0]));
        let far = maker.key_for(&doc_with_numbers(0, &[50.0]));
        assert!(close > far);
    }

    #[test]
    fn bool_key_distance_is_zero_or_one() {
        let mut doc = SortDocument::default();
        doc.bools.insert(0, vec![true]);
        let maker = MultiValueKeyMaker::new(vec![SubKey::Bool { slot: 0, reverse: false, reference: true }]);
        let key_match = maker.key_for(&doc);
        let maker_miss = MultiValueKeyMaker::new(vec![SubKey::Bool { slot: 0, reverse: false, reference: false }]);
        let key_miss = maker_miss.key_for(&doc);
        assert!(key_match < key_miss);
    }

    #[test]
    fn forward_subkey_followed_by_reverse_subkey_still_gets_terminated() {
        // A forward sub-key that is not the literal last one in the list
        // must still be terminated, even though it is the last *forward*
        // one — omitting it here would corrupt the ordering across the
        // following reverse sub-key.
        let maker = MultiValueKeyMaker::new(vec![
            SubKey::Serialise { slot: 0, reverse: false },
            SubKey::Serialise { slot: 1, reverse: true },
        ]);
        let mut doc_a = SortDocument::default();
        doc_a.serialised.insert(0, vec![vec![5]]);
        doc_a.serialised.insert(1, vec![vec![10]]);
        let mut doc_b = SortDocument::default();
        doc_b.serialised.insert(0, vec![vec![5, 1]]);
        doc_b.serialised.insert(1, vec![]);

        let key_a = maker.key_for(&doc_a);
        let key_b = maker.key_for(&doc_b);
        assert!(key_a < key_b);
    }

    #[test]
    fn composes_multiple_subkeys_in_order() {
        let maker = MultiValueKeyMaker::new(vec![
            SubKey::Float { slot: 0, reverse: false, reference: 0.0 },
            SubKey::Float { slot: 1, reverse: false, reference: 0.0 },
        ]);
        let mut doc = SortDocument::default();
        doc.numbers.insert(0, vec![5.0]);
        doc.numbers.insert(1, vec![1.0]);
        let key = maker.key_for(&doc);
        assert!(!key.is_empty());
    }
}
