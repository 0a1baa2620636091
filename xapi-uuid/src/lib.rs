//! Condensed and expanded RFC 4122 v1 UUID codec.
//!
//! A "condensed" UUID packs the 60-bit time, 14-bit clock sequence and
//! either a 7-bit salt (compact shape, node reconstructed on read) or a
//! full 48-bit node (expanded shape) behind a variable-length 4..16
//! byte prefix. This lets v1 UUIDs generated by this process compress
//! to as little as 4 bytes on the wire while still decoding back to a
//! byte-identical UUID.

mod mt19937;

use mt19937::Mt19937;
use std::fmt;
use thiserror::Error;

pub const UUID_LENGTH: usize = 36;
const UUID_MAX_SERIALISED_LENGTH: usize = 17;

// 0x01b21dd213814000 is the number of 100-ns intervals between the UUID
// epoch 1582-10-15 00:00:00 and the Unix epoch 1970-01-01 00:00:00.
const UUID_TIME_EPOCH: u64 = 0x01b2_1dd2_1381_4000;
const UUID_TIME_YEAR: u64 = 0x0001_1f02_4124_3c00;
// UUID_TIME_INITIAL = UUID_TIME_EPOCH + (2016 - 1970) years.
const UUID_TIME_INITIAL: u64 = UUID_TIME_EPOCH.wrapping_add(46u64.wrapping_mul(UUID_TIME_YEAR));

const TIME_BITS: u32 = 60;
const COMPACTED_BITS: u32 = 1;
const SALT_BITS: u32 = 7;
const CLOCK_BITS: u32 = 14;
const NODE_BITS: u32 = 48;
const PADDING_C1_BITS: u32 = 64 - COMPACTED_BITS - SALT_BITS - CLOCK_BITS; // 42
const PADDING_E1_BITS: u32 = 64 - COMPACTED_BITS - NODE_BITS - CLOCK_BITS; // 1

const TIME_MASK: u64 = (1u64 << TIME_BITS) - 1;
const SALT_MASK: u64 = (1u64 << SALT_BITS) - 1;
const CLOCK_MASK: u64 = (1u64 << CLOCK_BITS) - 1;
const NODE_MASK: u64 = (1u64 << NODE_BITS) - 1;
const MULTICAST_BIT: u64 = 0x0100_0000_0000;

/// Variable-length prefix table: `VL[len-4][quadrant] = (prefix, mask)`.
const VL: [[(u8, u8); 2]; 13] = [
    [(0x1c, 0xfc), (0x1c, 0xfc)], // 4
    [(0x18, 0xfc), (0x18, 0xfc)], // 5
    [(0x14, 0xfc), (0x14, 0xfc)], // 6
    [(0x10, 0xfc), (0x10, 0xfc)], // 7
    [(0x04, 0xfc), (0x40, 0xc0)], // 8
    [(0x0a, 0xfe), (0xa0, 0xe0)], // 9
    [(0x08, 0xfe), (0x80, 0xe0)], // 10
    [(0x02, 0xff), (0x20, 0xf0)], // 11
    [(0x03, 0xff), (0x30, 0xf0)], // 12
    [(0x0c, 0xff), (0xc0, 0xf0)], // 13
    [(0x0d, 0xff), (0xd0, 0xf0)], // 14
    [(0x0e, 0xff), (0xe0, 0xf0)], // 15
    [(0x0f, 0xff), (0xf0, 0xf0)], // 16
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UuidError {
    #[error("invalid UUID string: {0}")]
    InvalidString(String),
    #[error("bad encoded UUID")]
    BadEncoded,
    #[error("bad condensed UUID")]
    BadCondensed,
}

fn fnv_1a(mut num: u64) -> u64 {
    let mut fnv: u64 = 0xcbf2_9ce4_8422_2325;
    while num != 0 {
        fnv ^= num & 0xff;
        fnv = fnv.wrapping_mul(0x0000_0100_0000_01b3);
        num >>= 8;
    }
    fnv
}

fn xor_fold(mut num: u64, bits: u32) -> u64 {
    let mut folded = 0u64;
    while num != 0 {
        folded ^= num;
        num >>= bits;
    }
    folded
}

/// Reconstructs the 48-bit node for a compact condenser from its
/// `(time, clock, salt)` triple, seeding `mt19937` exactly the way the
/// reference implementation does.
fn calculate_node(time: u64, clock: u64, salt: u64) -> u64 {
    if time == 0 && clock == 0 && salt == 0 {
        return 0x0100_0000_0000;
    }
    let mut seed: u32 = 0;
    seed ^= fnv_1a(time) as u32;
    seed ^= fnv_1a(clock) as u32;
    seed ^= fnv_1a(salt) as u32;
    let mut rng = Mt19937::new(seed);
    let mut node = rng.next_u32() as u64;
    node <<= 32;
    node |= rng.next_u32() as u64;
    node &= NODE_MASK & !SALT_MASK;
    node |= salt;
    node |= MULTICAST_BIT;
    node
}

/// Either shape a condensed UUID can take: `salt` is meaningful only
/// when `compacted`, `node` only when not.
#[derive(Debug, Clone, Copy, Default)]
struct Condenser {
    compacted: bool,
    time: u64,
    clock: u64,
    salt: u64,
    node: u64,
}

impl Condenser {
    fn serialise(&self) -> Vec<u8> {
        let val0 = self.time & TIME_MASK;
        let val1 = if self.compacted {
            ((self.clock & CLOCK_MASK) << 50) | ((self.salt & SALT_MASK) << 43) | 1
        } else {
            ((self.clock & CLOCK_MASK) << 50) | ((self.node & NODE_MASK) << 2)
        };

        let (buf0, buf1) = if self.compacted {
            (val0 >> PADDING_C1_BITS, (val0 << (64 - PADDING_C1_BITS)) | (val1 >> PADDING_C1_BITS) | 1)
        } else {
            (val0 >> PADDING_E1_BITS, (val0 << (64 - PADDING_E1_BITS)) | (val1 >> PADDING_E1_BITS))
        };

        let mut buf = [0u8; UUID_MAX_SERIALISED_LENGTH];
        buf[0] = 0;
        buf[1..9].copy_from_slice(&buf0.to_be_bytes());
        buf[9..17].copy_from_slice(&buf1.to_be_bytes());

        // Trim leading zero bytes, but never below the last 4 bytes.
        let end = 13usize;
        let mut idx = 0usize;
        loop {
            if idx == end {
                break;
            }
            idx += 1;
            if buf[idx] != 0 {
                break;
            }
        }

        let length = 17 - idx;
        let table = &VL[length - 4];
        if (buf[idx] & table[0].1) != 0 {
            if (buf[idx] & table[1].1) != 0 && length < 16 {
                idx -= 1;
                let length = length + 1;
                buf[idx] |= VL[length - 4][0].0;
            } else {
                buf[idx] |= table[1].0;
            }
        } else {
            buf[idx] |= table[0].0;
        }

        buf[idx..17].to_vec()
    }

    fn unserialise(bytes: &[u8]) -> Result<(Self, usize), UuidError> {
        let size = bytes.len();
        if size < 2 {
            return Err(UuidError::BadEncoded);
        }
        let l = bytes[0];
        let q = usize::from((l & 0xf0) != 0);
        let mut length = size + 1;
        let mut table_row = 0usize;
        for (i, row) in VL.iter().enumerate() {
            if row[q].0 == (l & row[q].1) {
                length = i + 4;
                table_row = i;
                break;
            }
        }
        if size < length {
            return Err(UuidError::BadCondensed);
        }

        let mut buf = [0u8; UUID_MAX_SERIALISED_LENGTH];
        let start = 17 - length;
        buf[start..17].copy_from_slice(&bytes[..length]);
        buf[start] &= !VL[table_row][q].1;

        let buf0 = u64::from_le_bytes(buf[1..9].try_into().unwrap());
        let buf1 = u64::from_le_bytes(buf[9..17].try_into().unwrap());

        let (val0, val1) = if buf1 & 1 != 0 {
            (
                (buf0 << PADDING_C1_BITS) | (buf1 >> (64 - PADDING_C1_BITS)),
                (buf1 << PADDING_C1_BITS) | 1,
            )
        } else {
            (
                (buf0 << PADDING_E1_BITS) | (buf1 >> (64 - PADDING_E1_BITS)),
                buf1 << PADDING_E1_BITS,
            )
        };

        let compacted = val1 & 1 != 0;
        let time = val0 & TIME_MASK;
        let clock = (val1 >> 50) & CLOCK_MASK;
        let (salt, node) = if compacted {
            ((val1 >> 43) & SALT_MASK, 0)
        } else {
            (0, (val1 >> 2) & NODE_MASK)
        };

        Ok((Condenser { compacted, time, clock, salt, node }, length))
    }
}

/// A 16-byte RFC 4122 UUID, stored big-endian (canonical byte order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid([u8; 16]);

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self.to_string_canonical())
    }
}

impl Uuid {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Uuid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Parses the canonical 8-4-4-4-12 hex form.
    pub fn parse_str(s: &str) -> Result<Self, UuidError> {
        if !Self::is_valid(s) {
            return Err(UuidError::InvalidString(s.to_string()));
        }
        let mut out = [0u8; 16];
        let clean: String = s.chars().filter(|c| *c != '-').collect();
        let bytes = clean.as_bytes();
        for i in 0..16 {
            out[i] = u8::from_str_radix(std::str::from_utf8(&bytes[i * 2..i * 2 + 2]).unwrap(), 16)
                .map_err(|_| UuidError::InvalidString(s.to_string()))?;
        }
        Ok(Uuid(out))
    }

    pub fn is_valid(s: &str) -> bool {
        if s.len() != UUID_LENGTH {
            return false;
        }
        let b = s.as_bytes();
        for (i, c) in b.iter().enumerate() {
            match i {
                8 | 13 | 18 | 23 => {
                    if *c != b'-' {
                        return false;
                    }
                }
                _ => {
                    if !(*c as char).is_ascii_hexdigit() {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn to_string_canonical(&self) -> String {
        let b = &self.0;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }

    fn uuid1_node(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[2..8].copy_from_slice(&self.0[10..16]);
        u64::from_be_bytes(buf) & NODE_MASK
    }

    fn set_uuid1_node(&mut self, node: u64) {
        self.0[10..16].copy_from_slice(&node.to_be_bytes()[2..8]);
    }

    fn uuid1_time(&self) -> u64 {
        let time_low = u32::from_be_bytes(self.0[0..4].try_into().unwrap()) as u64;
        let time_mid = u16::from_be_bytes(self.0[4..6].try_into().unwrap()) as u64;
        let time_hi = (u16::from_be_bytes(self.0[6..8].try_into().unwrap()) as u64) & 0x0fff;
        (time_hi << 48) | (time_mid << 32) | time_low
    }

    fn set_uuid1_time(&mut self, time: u64) {
        let time_low = (time & 0xffff_ffff) as u32;
        let time_mid = ((time >> 32) & 0xffff) as u16;
        let mut time_hi_version = ((time >> 48) & 0x0fff) as u16;
        time_hi_version |= u16::from_be_bytes(self.0[6..8].try_into().unwrap()) & 0xf000;
        self.0[0..4].copy_from_slice(&time_low.to_be_bytes());
        self.0[4..6].copy_from_slice(&time_mid.to_be_bytes());
        self.0[6..8].copy_from_slice(&time_hi_version.to_be_bytes());
    }

    fn uuid1_clock_seq(&self) -> u64 {
        (((self.0[8] & 0x3f) as u64) << 8) | self.0[9] as u64
    }

    fn set_uuid1_clock_seq(&mut self, clock: u64) {
        let low = (clock & 0xff) as u8;
        let hi_variant = (((clock >> 8) & 0x3f) as u8) | (self.0[8] & 0xc0);
        self.0[8] = hi_variant;
        self.0[9] = low;
    }

    pub fn variant(&self) -> u8 {
        self.0[8] & 0xc0
    }

    pub fn version(&self) -> u8 {
        self.0[6] >> 4
    }

    fn set_version(&mut self, version: u8) {
        self.0[6] = (self.0[6] & 0x0f) | (version << 4);
    }

    fn set_variant(&mut self, variant: u8) {
        self.0[8] = (self.0[8] & 0x3f) | (variant & 0xc0);
    }

    pub fn is_v1(&self) -> bool {
        self.variant() == 0x80 && self.version() == 1
    }

    /// Crushes a v1 UUID's node into the smallest representation that
    /// still round-trips through [`Uuid::serialise`]/[`Uuid::unserialise`].
    /// No-op for non-v1 UUIDs.
    pub fn compact_crush(&mut self) {
        if !self.is_v1() {
            return;
        }
        let node = self.uuid1_node();
        let clock = self.uuid1_clock_seq();
        let time = self.uuid1_time();

        let mut compacted_time = if time != 0 { time.wrapping_sub(UUID_TIME_INITIAL) & TIME_MASK } else { time };
        let compacted_time_clock = compacted_time & CLOCK_MASK;
        compacted_time >>= CLOCK_BITS;

        let clock_xored = clock ^ compacted_time_clock;
        let salt = if node & MULTICAST_BIT != 0 {
            node & SALT_MASK
        } else {
            // Node carries a real hardware MAC rather than our own
            // salt; there is no cluster identity service in this
            // crate, so fold the node itself to derive a deterministic
            // salt instead of a per-node-service index.
            xor_fold(fnv_1a(node), SALT_BITS as u32) & SALT_MASK
        };

        let new_node = calculate_node(compacted_time, clock_xored, salt);
        self.set_uuid1_node(new_node);
        self.set_uuid1_clock_seq(clock_xored);

        let mut new_time = compacted_time;
        if new_time != 0 {
            new_time = ((new_time << CLOCK_BITS) + UUID_TIME_INITIAL) & TIME_MASK;
        }
        self.set_uuid1_time(new_time);
    }

    /// Serialises to the shortest form that round-trips: condensed for
    /// v1 UUIDs, full (17-byte) form otherwise.
    pub fn serialise(&self) -> Vec<u8> {
        if self.is_v1() {
            self.serialise_condensed()
        } else {
            self.serialise_full()
        }
    }

    pub fn serialise_full(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.push(0x01);
        out.extend_from_slice(&self.0);
        out
    }

    fn serialise_condensed(&self) -> Vec<u8> {
        let node = self.uuid1_node();
        let clock = self.uuid1_clock_seq();
        let time = self.uuid1_time();

        let mut compacted_time = if time != 0 { time.wrapping_sub(UUID_TIME_INITIAL) & TIME_MASK } else { time };
        let compacted_time_clock = compacted_time & CLOCK_MASK;
        compacted_time >>= CLOCK_BITS;

        let mut condenser = Condenser {
            compacted: true,
            clock: clock ^ compacted_time_clock,
            time: compacted_time,
            salt: node & SALT_MASK,
            node: 0,
        };

        let compacted_node = calculate_node(condenser.time, condenser.clock, condenser.salt);
        if node != compacted_node {
            condenser.compacted = false;
            let mut full_time = time;
            if node & MULTICAST_BIT == 0 && full_time != 0 {
                full_time = full_time.wrapping_sub(UUID_TIME_INITIAL) & TIME_MASK;
            }
            condenser.clock = clock;
            condenser.time = full_time;
            condenser.node = node;
        }

        condenser.serialise()
    }

    pub fn unserialise(bytes: &[u8]) -> Result<Self, UuidError> {
        let (u, _) = Self::unserialise_prefix(bytes)?;
        Ok(u)
    }

    /// Like [`Uuid::unserialise`] but also returns how many bytes of
    /// `bytes` were consumed, for decoding concatenated sequences.
    pub fn unserialise_prefix(bytes: &[u8]) -> Result<(Self, usize), UuidError> {
        if bytes.len() < 2 {
            return Err(UuidError::BadEncoded);
        }
        if bytes[0] == 1 {
            return Self::unserialise_full(bytes);
        }
        Self::unserialise_condensed_prefix(bytes)
    }

    fn unserialise_full(bytes: &[u8]) -> Result<(Self, usize), UuidError> {
        if bytes.len() < 17 {
            return Err(UuidError::BadEncoded);
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes[1..17]);
        Ok((Uuid(out), 17))
    }

    fn unserialise_condensed_prefix(bytes: &[u8]) -> Result<(Self, usize), UuidError> {
        let (condenser, consumed) = Condenser::unserialise(bytes)?;

        let node = if condenser.compacted {
            calculate_node(condenser.time, condenser.clock, condenser.salt)
        } else {
            condenser.node
        };

        let mut time = condenser.time;
        if time != 0 {
            if condenser.compacted {
                time = ((time << CLOCK_BITS) + UUID_TIME_INITIAL) & TIME_MASK;
            } else if node & MULTICAST_BIT == 0 {
                time = (time + UUID_TIME_INITIAL) & TIME_MASK;
            }
        }

        let time_low = (time & 0xffff_ffff) as u32;
        let time_mid = ((time >> 32) & 0xffff) as u16;
        let time_hi_version = (((time >> 48) & 0x0fff) as u16) | 0x1000;
        let clock_seq_hi_variant = ((condenser.clock >> 8) as u8) | 0x80;
        let clock_seq_low = (condenser.clock & 0xff) as u8;

        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&time_low.to_be_bytes());
        out[4..6].copy_from_slice(&time_mid.to_be_bytes());
        out[6..8].copy_from_slice(&time_hi_version.to_be_bytes());
        out[8] = clock_seq_hi_variant;
        out[9] = clock_seq_low;
        out[10..16].copy_from_slice(&node.to_be_bytes()[2..8]);

        let mut u = Uuid(out);
        u.set_variant(0x80);
        u.set_version(1);
        Ok((u, consumed))
    }

    /// Deterministic validator: true iff `bytes` is exactly one
    /// serialised UUID (full or condensed) with nothing left over.
    pub fn is_serialised(bytes: &[u8]) -> bool {
        match Self::unserialise_prefix(bytes) {
            Ok((_, consumed)) => consumed == bytes.len(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_canonical())
    }
}

impl std::str::FromStr for Uuid {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uuid1(time: u64, clock: u64, node: u64) -> Uuid {
        let mut out = [0u8; 16];
        let time_low = (time & 0xffff_ffff) as u32;
        let time_mid = ((time >> 32) & 0xffff) as u16;
        let time_hi_version = (((time >> 48) & 0x0fff) as u16) | 0x1000;
        out[0..4].copy_from_slice(&time_low.to_be_bytes());
        out[4..6].copy_from_slice(&time_mid.to_be_bytes());
        out[6..8].copy_from_slice(&time_hi_version.to_be_bytes());
        out[8] = (((clock >> 8) & 0x3f) as u8) | 0x80;
        out[9] = (clock & 0xff) as u8;
        out[10..16].copy_from_slice(&node.to_be_bytes()[2..8]);
        Uuid(out)
    }

    #[test]
    fn round_trips_canonical_string() {
        let s = "00000000-0000-1000-8000-010000000000";
        assert!(Uuid::is_valid(s));
        let u = Uuid::parse_str(s).unwrap();
        assert_eq!(u.to_string_canonical(), s);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(!Uuid::is_valid("not-a-uuid"));
        assert!(!Uuid::is_valid("00000000-0000-1000-8000-01000000000")); // too short
    }

    #[test]
    fn serialise_condensed_round_trips_for_null_v1() {
        let u = uuid1(0, 0, 0x0100_0000_0000);
        let ser = u.serialise();
        assert!(ser.len() >= 4 && ser.len() <= 16);
        let back = Uuid::unserialise(&ser).unwrap();
        assert_eq!(u, back);
    }

    #[test]
    fn serialise_condensed_round_trips_for_real_time() {
        let u = uuid1(UUID_TIME_INITIAL + 123_456_789, 0x1aaa, 0x0100_0000_002a);
        let ser = u.serialise();
        let back = Uuid::unserialise(&ser).unwrap();
        assert_eq!(u, back);
        assert!(Uuid::is_serialised(&ser));
    }

    #[test]
    fn serialise_falls_back_to_expanded_for_foreign_node() {
        // Real hardware MAC: multicast bit not set.
        let u = uuid1(UUID_TIME_INITIAL + 42, 0x2bcd, 0x0020_2233_4455);
        let ser = u.serialise();
        let back = Uuid::unserialise(&ser).unwrap();
        assert_eq!(u, back);
    }

    #[test]
    fn full_form_round_trips_for_non_v1() {
        let mut bytes = [0u8; 16];
        bytes[6] = 0x40; // version 4
        bytes[8] = 0x80; // variant
        bytes[0] = 0xab;
        let u = Uuid(bytes);
        let ser = u.serialise();
        assert_eq!(ser[0], 0x01);
        assert_eq!(ser.len(), 17);
        let back = Uuid::unserialise(&ser).unwrap();
        assert_eq!(u, back);
    }

    #[test]
    fn compact_crush_preserves_identity_fields() {
        let mut u = uuid1(UUID_TIME_INITIAL + 999, 0x1234, 0x0020_1111_2222);
        let before_variant = u.variant();
        let before_version = u.version();
        u.compact_crush();
        assert_eq!(u.variant(), before_variant);
        assert_eq!(u.version(), before_version);
    }

    proptest::proptest! {
        /// Any v1 UUID, compact-shaped (multicast node, the case this codec
        /// condenses to 4..16 bytes) or foreign-node (falls back to the
        /// full 17-byte form), serialises and unserialises back losslessly.
        #[test]
        fn v1_serialise_round_trips(
            time_offset in 0u64..(1u64 << 58),
            clock in 0u64..(1 << 14),
            node_low in 0u64..(1u64 << 48),
            multicast in proptest::bool::ANY,
        ) {
            let node = if multicast { node_low | MULTICAST_BIT } else { node_low & !MULTICAST_BIT };
            let u = uuid1(UUID_TIME_INITIAL.wrapping_add(time_offset), clock, node);
            let ser = u.serialise();
            prop_assert!(ser.len() >= 4 && ser.len() <= 17);
            let back = Uuid::unserialise(&ser).unwrap();
            prop_assert_eq!(u, back);
        }

        /// Canonical string parsing is lossless for any valid v1 layout.
        #[test]
        fn canonical_string_round_trips(
            time_offset in 0u64..(1u64 << 58),
            clock in 0u64..(1 << 14),
            node in 0u64..(1 << 48),
        ) {
            let u = uuid1(UUID_TIME_INITIAL.wrapping_add(time_offset), clock, node);
            let s = u.to_string_canonical();
            let back = Uuid::parse_str(&s).unwrap();
            prop_assert_eq!(u, back);
        }
    }
}
