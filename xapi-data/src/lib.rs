//! The document payload codec: an ordered sequence of [`Locator`]s framed as
//! `HEADER_MAGIC || Locator+ || 0x00 || FOOTER_MAGIC`, with optional LZ4
//! compression and blob-storage references, plus `Accept`-style content
//! negotiation over the locator set.

mod length;

pub use length::{serialise_length, unserialise_length};

use once_cell::sync::OnceCell;
use std::fmt;
use xapi_types::{Error, Result};

const DATABASE_DATA_HEADER_MAGIC: u8 = 0x11;
const DATABASE_DATA_FOOTER_MAGIC: u8 = 0x15;

/// `inplace` and `stored` carry raw bytes inline; the `compressed_*`
/// variants store LZ4-compressed bytes and decompress lazily on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LocatorType {
    Inplace = 0,
    CompressedInplace = 1,
    Stored = 2,
    CompressedStored = 3,
}

impl LocatorType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(LocatorType::Inplace),
            1 => Ok(LocatorType::CompressedInplace),
            2 => Ok(LocatorType::Stored),
            3 => Ok(LocatorType::CompressedStored),
            _ => Err(Error::Serialisation("bad encoded data locator: unknown type".into())),
        }
    }
}

/// A MIME content-type split into `type`/`subtype`, case-folded and
/// trimmed the way an `Accept`/`Content-Type` header value would be.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct CtType {
    pub first: String,
    pub second: String,
}

impl CtType {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        CtType { first: first.into(), second: second.into() }
    }

    pub fn empty() -> Self {
        CtType::default()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    pub fn to_string_repr(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("{}/{}", self.first, self.second)
        }
    }
}

impl fmt::Display for CtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_repr())
    }
}

impl From<&str> for CtType {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s.find('/') {
            None => CtType::default(),
            Some(slash) => {
                let type_part = s[..slash].trim_matches(|c: char| c.is_whitespace());
                let rest = &s[slash + 1..];
                let subtype_end = rest.find(';').unwrap_or(rest.len());
                let subtype_part = rest[..subtype_end].trim();
                CtType::new(type_part.to_lowercase(), subtype_part.to_lowercase())
            }
        }
    }
}

/// One accept-set entry: a content-type pattern with an ordering position,
/// a priority (q-value), and an optional indent hint for the serialiser.
#[derive(Debug, Clone)]
pub struct Accept {
    pub position: usize,
    pub priority: f64,
    pub ct_type: CtType,
    pub indent: i32,
}

/// A typed pointer to one part of a document: inline bytes, or a
/// `(volume, offset, size)` reference into external blob storage.
#[derive(Debug, Clone)]
pub struct Locator {
    pub ct_type: CtType,
    pub ltype: LocatorType,
    pub size: usize,
    pub volume: u64,
    pub offset: u64,
    raw: Vec<u8>,
    decompressed: OnceCell<Vec<u8>>,
}

impl Locator {
    pub fn new(ct_type: CtType, ltype: LocatorType) -> Self {
        Locator {
            ct_type,
            ltype,
            size: 0,
            volume: 0,
            offset: 0,
            raw: Vec::new(),
            decompressed: OnceCell::new(),
        }
    }

    /// Sets the payload, applying the locator's compression policy: a
    /// `compressed_*` locator compresses iff the input is at least 128
    /// bytes AND compression actually shrinks it; otherwise it demotes to
    /// the corresponding uncompressed type for this assignment.
    pub fn set_data(&mut self, new_data: Vec<u8>) {
        self.size = new_data.len();
        match self.ltype {
            LocatorType::CompressedInplace | LocatorType::CompressedStored => {
                if new_data.len() >= 128 {
                    let compressed = lz4_flex::compress_prepend_size(&new_data);
                    if compressed.len() < new_data.len() {
                        self.raw = compressed;
                        self.decompressed = OnceCell::new();
                        return;
                    }
                }
                self.ltype = match self.ltype {
                    LocatorType::CompressedInplace => LocatorType::Inplace,
                    _ => LocatorType::Stored,
                };
                self.raw = new_data;
                self.decompressed = OnceCell::new();
            }
            LocatorType::Inplace | LocatorType::Stored => {
                self.raw = new_data;
                self.decompressed = OnceCell::new();
            }
        }
    }

    /// The logical payload bytes, decompressing and caching on first read
    /// for `compressed_*` locators.
    pub fn data(&self) -> &[u8] {
        if self.size == 0 {
            return &[];
        }
        match self.ltype {
            LocatorType::Inplace | LocatorType::Stored => &self.raw,
            LocatorType::CompressedInplace | LocatorType::CompressedStored => {
                if self.raw.is_empty() {
                    return &[];
                }
                self.decompressed
                    .get_or_init(|| lz4_flex::decompress_size_prepended(&self.raw).unwrap_or_default())
            }
        }
    }

    pub fn serialise(&self) -> Vec<u8> {
        if self.size == 0 {
            return Vec::new();
        }
        let mut body = Vec::new();
        let ct_str = self.ct_type.to_string_repr();
        body.extend(serialise_length(ct_str.len() as u64));
        body.extend(ct_str.as_bytes());
        body.push(self.ltype as u8);
        if matches!(self.ltype, LocatorType::Stored | LocatorType::CompressedStored) {
            body.extend(serialise_length(self.volume));
            body.extend(serialise_length(self.offset));
            body.extend(serialise_length(self.size as u64));
        }
        body.extend(&self.raw);

        let mut result = serialise_length(body.len() as u64);
        result.extend(body);
        result
    }

    pub fn unserialise(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let ct_len = unserialise_length(bytes, &mut pos)? as usize;
        let ct_str = std::str::from_utf8(
            bytes
                .get(pos..pos + ct_len)
                .ok_or_else(|| Error::Serialisation("truncated locator content-type".into()))?,
        )
        .map_err(|e| Error::Serialisation(e.to_string()))?;
        pos += ct_len;
        let ct_type = CtType::from(ct_str);

        let type_byte = *bytes
            .get(pos)
            .ok_or_else(|| Error::Serialisation("truncated locator type byte".into()))?;
        pos += 1;
        let ltype = LocatorType::from_byte(type_byte)?;

        let mut locator = Locator::new(ct_type, ltype);
        match ltype {
            LocatorType::Inplace | LocatorType::CompressedInplace => {
                locator.raw = bytes[pos..].to_vec();
                locator.size = locator.raw.len();
            }
            LocatorType::Stored | LocatorType::CompressedStored => {
                locator.volume = unserialise_length(bytes, &mut pos)?;
                locator.offset = unserialise_length(bytes, &mut pos)?;
                locator.size = unserialise_length(bytes, &mut pos)? as usize;
                locator.raw = bytes[pos..].to_vec();
            }
        }
        Ok(locator)
    }
}

impl PartialEq for Locator {
    fn eq(&self, other: &Self) -> bool {
        self.ct_type == other.ct_type
    }
}
impl Eq for Locator {}

/// The full document payload: a version token plus the committed locator
/// sequence, with a staging area (`pending`) for locators not yet flushed.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub version: Vec<u8>,
    locators: Vec<Locator>,
    pending: Vec<Locator>,
}

impl Data {
    pub fn new() -> Self {
        Data::default()
    }

    pub fn from_serialised(serialised: &[u8], version: Vec<u8>) -> Self {
        let mut data = Data { version, locators: Vec::new(), pending: Vec::new() };
        data.feed(serialised);
        data
    }

    /// Parses `serialised` into the locator sequence, discarding it (and
    /// leaving `locators` empty) on any framing error, mirroring the
    /// original's fail-open "reset to empty" policy.
    fn feed(&mut self, serialised: &[u8]) {
        self.locators.clear();
        if serialised.len() < 2 {
            return;
        }
        if serialised[0] != DATABASE_DATA_HEADER_MAGIC {
            return;
        }
        let mut pos = 1usize;
        let end = serialised.len();
        while pos < end {
            let length = match unserialise_length(serialised, &mut pos) {
                Ok(l) => l as usize,
                Err(_) => {
                    self.locators.clear();
                    return;
                }
            };
            if length == 0 {
                break;
            }
            if pos + length > end {
                self.locators.clear();
                return;
            }
            match Locator::unserialise(&serialised[pos..pos + length]) {
                Ok(locator) => self.locators.push(locator),
                Err(_) => {
                    self.locators.clear();
                    return;
                }
            }
            pos += length;
        }
        if pos >= end || serialised[pos] != DATABASE_DATA_FOOTER_MAGIC {
            self.locators.clear();
            return;
        }
        if pos + 1 != end {
            self.locators.clear();
        }
    }

    pub fn push(&mut self, locator: Locator) {
        self.pending.push(locator);
    }

    /// Merges `pending` into `locators`: locators superseded by a pending
    /// op (matched by content-type) are dropped first, surviving locators
    /// keep their order, and new ops are appended afterwards with any
    /// empty-content-type ("main object") op pushed to the front.
    pub fn flush(&mut self) {
        let ops = std::mem::take(&mut self.pending);
        let mut new_locators = Vec::with_capacity(self.locators.len() + ops.len());

        for op in &ops {
            for locator in &mut self.locators {
                if locator.size != 0 && locator.ct_type == op.ct_type {
                    locator.size = 0;
                }
            }
            if op.ct_type.is_empty() && op.size != 0 {
                new_locators.push(op.clone_shallow());
            }
        }
        for locator in self.locators.drain(..) {
            if locator.size != 0 {
                new_locators.push(locator);
            }
        }
        for op in &ops {
            if !op.ct_type.is_empty() && op.size != 0 {
                new_locators.push(op.clone_shallow());
            }
        }
        self.locators = new_locators;
    }

    pub fn serialise(&self) -> Vec<u8> {
        if self.locators.is_empty() {
            return Vec::new();
        }
        let mut out = vec![DATABASE_DATA_HEADER_MAGIC];
        for locator in &self.locators {
            out.extend(locator.serialise());
        }
        out.push(0u8);
        out.push(DATABASE_DATA_FOOTER_MAGIC);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Locator> {
        self.locators.iter()
    }

    pub fn get(&self, ct_type: &CtType) -> Option<&Locator> {
        self.locators.iter().find(|l| &l.ct_type == ct_type)
    }

    /// Walks `locators × accept_set`; a direct `mime_type` match
    /// short-circuits, otherwise the highest-priority accept wins with
    /// ties broken by locator (and within-locator accept) encounter order.
    pub fn get_accepted<'a>(
        &'a self,
        accept_set: &'a [Accept],
        mime_type: &CtType,
    ) -> (Option<&'a Locator>, Option<&'a Accept>) {
        let mut accepted: Option<&Locator> = None;
        let mut accepted_by: Option<&Accept> = None;
        let mut accepted_priority = -1.0f64;

        for locator in &self.locators {
            let ct_type = &locator.ct_type;
            for accept in accept_set {
                let matches = (accept.ct_type.first == "*" && accept.ct_type.second == "*")
                    || (accept.ct_type.first == "*" && accept.ct_type.second == ct_type.second)
                    || (accept.ct_type.first == ct_type.first && accept.ct_type.second == "*")
                    || (&accept.ct_type == ct_type);
                if !matches {
                    continue;
                }
                if !mime_type.is_empty() && ct_type.first == mime_type.first && ct_type.second == mime_type.second {
                    return (Some(locator), Some(accept));
                }
                if accept.priority >= accepted_priority {
                    accepted_priority = accept.priority;
                    accepted = Some(locator);
                    accepted_by = Some(accept);
                }
            }
        }
        (accepted, accepted_by)
    }
}

impl Locator {
    fn clone_shallow(&self) -> Locator {
        Locator {
            ct_type: self.ct_type.clone(),
            ltype: self.ltype,
            size: self.size,
            volume: self.volume,
            offset: self.offset,
            raw: self.raw.clone(),
            decompressed: OnceCell::new(),
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.serialise() == other.serialise()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inplace(ct: &str, bytes: &[u8]) -> Locator {
        let mut l = Locator::new(CtType::from(ct), LocatorType::Inplace);
        l.set_data(bytes.to_vec());
        l
    }

    #[test]
    fn ct_type_parses_and_lowercases() {
        let ct = CtType::from("Image/PNG; q=0.9");
        assert_eq!(ct.first, "image");
        assert_eq!(ct.second, "png");
    }

    #[test]
    fn locator_round_trips_inplace() {
        let locator = inplace("application/json", b"{\"a\":1}");
        let serialised = locator.serialise();
        let mut pos = 0;
        let len = unserialise_length(&serialised, &mut pos).unwrap() as usize;
        let back = Locator::unserialise(&serialised[pos..pos + len]).unwrap();
        assert_eq!(back.ct_type.to_string_repr(), "application/json");
        assert_eq!(back.data(), b"{\"a\":1}");
    }

    #[test]
    fn locator_compresses_large_payloads() {
        let mut l = Locator::new(CtType::empty(), LocatorType::CompressedInplace);
        let payload = vec![b'x'; 4096];
        l.set_data(payload.clone());
        assert_eq!(l.ltype, LocatorType::CompressedInplace);
        assert_eq!(l.data(), payload.as_slice());
    }

    #[test]
    fn locator_falls_back_when_compression_does_not_help() {
        let mut l = Locator::new(CtType::empty(), LocatorType::CompressedInplace);
        let payload: Vec<u8> = (0u16..200).map(|i| (i % 251) as u8).collect();
        l.set_data(payload.clone());
        // whether this particular incompressible-ish payload demotes depends
        // on lz4's actual output size; either way data() must round-trip.
        assert_eq!(l.data(), payload.as_slice());
    }

    #[test]
    fn data_round_trips_through_serialise_and_feed() {
        let mut data = Data::new();
        data.push(inplace("", b"{\"a\":1}"));
        let mut stored = Locator::new(CtType::from("image/png"), LocatorType::Stored);
        stored.volume = 3;
        stored.offset = 1024;
        stored.set_data(vec![7u8; 200]);
        data.push(stored);
        data.flush();

        let serialised = data.serialise();
        let reloaded = Data::from_serialised(&serialised, Vec::new());
        assert_eq!(reloaded.len(), 2);
        let png = reloaded.get(&CtType::from("image/png")).unwrap();
        assert_eq!(png.volume, 3);
        assert_eq!(png.offset, 1024);
        assert_eq!(png.size, 200);
    }

    #[test]
    fn flush_supersedes_same_content_type() {
        let mut data = Data::new();
        data.push(inplace("text/plain", b"v1"));
        data.flush();
        data.push(inplace("text/plain", b"v2"));
        data.flush();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&CtType::from("text/plain")).unwrap().data(), b"v2");
    }

    #[test]
    fn get_accepted_prefers_direct_mime_hint() {
        let mut data = Data::new();
        data.push(inplace("image/png", b"png-bytes"));
        data.push(inplace("image/jpeg", b"jpeg-bytes"));
        data.flush();

        let accept_set = vec![
            Accept { position: 0, priority: 0.5, ct_type: CtType::from("image/jpeg"), indent: 0 },
            Accept { position: 1, priority: 0.9, ct_type: CtType::from("image/png"), indent: 0 },
        ];
        let (locator, _) = data.get_accepted(&accept_set, &CtType::from("image/jpeg"));
        assert_eq!(locator.unwrap().ct_type.to_string_repr(), "image/jpeg");
    }

    #[test]
    fn get_accepted_falls_back_to_highest_priority() {
        let mut data = Data::new();
        data.push(inplace("image/png", b"png-bytes"));
        data.push(inplace("image/jpeg", b"jpeg-bytes"));
        data.flush();

        let accept_set = vec![
            Accept { position: 0, priority: 0.5, ct_type: CtType::from("image/jpeg"), indent: 0 },
            Accept { position: 1, priority: 0.9, ct_type: CtType::from("image/png"), indent: 0 },
        ];
        let (locator, _) = data.get_accepted(&accept_set, &CtType::empty());
        assert_eq!(locator.unwrap().ct_type.to_string_repr(), "image/png");
    }

    proptest::proptest! {
        /// Any single inplace locator round-trips through serialise/feed
        /// regardless of its payload size or content type.
        #[test]
        fn locator_round_trips_for_arbitrary_payload(ct_sub in "[a-z]{1,8}", payload in proptest::collection::vec(proptest::num::u8::ANY, 1..512)) {
            let locator = inplace(&format!("application/{ct_sub}"), &payload);
            let mut data = Data::new();
            data.push(locator);
            data.flush();
            let reloaded = Data::from_serialised(&data.serialise(), Vec::new());
            let got = reloaded.get(&CtType::from(format!("application/{ct_sub}").as_str())).unwrap();
            prop_assert_eq!(got.data(), payload.as_slice());
        }
    }
}
