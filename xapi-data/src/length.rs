//! The variable-length length prefix shared by the Data codec and the UUID
//! condenser's serialised byte counts: single byte for `< 255`, else `0xff`
//! followed by a little-endian base-128 continuation of `length - 255`.

use xapi_types::Error;

pub fn serialise_length(len: u64) -> Vec<u8> {
    if len < 255 {
        return vec![len as u8];
    }
    let mut out = vec![0xffu8];
    let mut rest = len - 255;
    loop {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
    out
}

/// Reads a length prefix from `buf` starting at `*pos`, advancing `*pos`
/// past it. Mirrors `unserialise_length(&p, p_end, check_remaining)`.
pub fn unserialise_length(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let first = *buf
        .get(*pos)
        .ok_or_else(|| Error::Serialisation("unexpected end of data reading length".into()))?;
    *pos += 1;
    if first < 255 {
        return Ok(first as u64);
    }
    let mut len: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::Serialisation("unexpected end of data reading length".into()))?;
        *pos += 1;
        len |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(len + 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_small_lengths() {
        for n in [0u64, 1, 100, 254] {
            let bytes = serialise_length(n);
            assert_eq!(bytes.len(), 1);
            let mut pos = 0;
            assert_eq!(unserialise_length(&bytes, &mut pos).unwrap(), n);
            assert_eq!(pos, bytes.len());
        }
    }

    #[test]
    fn round_trips_large_lengths() {
        for n in [255u64, 256, 1000, 100_000, 10_000_000] {
            let bytes = serialise_length(n);
            let mut pos = 0;
            assert_eq!(unserialise_length(&bytes, &mut pos).unwrap(), n);
            assert_eq!(pos, bytes.len());
        }
    }

    #[test]
    fn errors_on_truncated_input() {
        let bytes = serialise_length(100_000);
        let mut pos = 0;
        assert!(unserialise_length(&bytes[..1], &mut pos).is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trips_any_length(n in 0u64..10_000_000_000) {
            let bytes = serialise_length(n);
            let mut pos = 0;
            prop_assert_eq!(unserialise_length(&bytes, &mut pos).unwrap(), n);
            prop_assert_eq!(pos, bytes.len());
        }
    }
}
