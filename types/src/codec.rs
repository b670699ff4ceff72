//! Shared codec helpers for the canonical game-state serialization.
//!
//! All persisted records are written field by field with fixed-width
//! primitives. Signed fields travel in their unsigned two's-complement
//! carrier so that only the well-known primitive codecs are involved.
//! Containers are length-prefixed with a `u32` and serialized in strictly
//! ascending key order; readers reject out-of-order keys, which makes the
//! encoding canonical (a given value has exactly one byte representation).

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use std::collections::{BTreeMap, BTreeSet};

/// Write a string as length-prefixed UTF-8 bytes.
pub fn write_string(s: &str, writer: &mut impl BufMut) {
    let bytes = s.as_bytes();
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Read a length-prefixed UTF-8 string, rejecting anything over `max_len`.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("String", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

/// Encoded size of a length-prefixed string.
pub fn string_encode_size(s: &str) -> usize {
    4 + s.len()
}

pub fn write_i32(v: i32, writer: &mut impl BufMut) {
    (v as u32).write(writer);
}

pub fn read_i32(reader: &mut impl Buf) -> Result<i32, Error> {
    Ok(u32::read(reader)? as i32)
}

pub fn write_i64(v: i64, writer: &mut impl BufMut) {
    (v as u64).write(writer);
}

pub fn read_i64(reader: &mut impl Buf) -> Result<i64, Error> {
    Ok(u64::read(reader)? as i64)
}

/// Write an ordered map as `u32` length followed by key/value pairs in
/// ascending key order.
pub fn write_map<K, V>(map: &BTreeMap<K, V>, writer: &mut impl BufMut)
where
    K: Write + Ord,
    V: Write,
{
    (map.len() as u32).write(writer);
    for (key, value) in map {
        key.write(writer);
        value.write(writer);
    }
}

/// Read an ordered map, enforcing strictly ascending keys.
pub fn read_map<K, V>(
    reader: &mut impl Buf,
    max_len: usize,
    cfg: &V::Cfg,
) -> Result<BTreeMap<K, V>, Error>
where
    K: Read<Cfg = ()> + Ord + Clone,
    V: Read,
{
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Map", "too long"));
    }
    let mut map = BTreeMap::new();
    let mut last: Option<K> = None;
    for _ in 0..len {
        let key = K::read_cfg(reader, &())?;
        if let Some(prev) = &last {
            if *prev >= key {
                return Err(Error::Invalid("Map", "keys not strictly ascending"));
            }
        }
        let value = V::read_cfg(reader, cfg)?;
        last = Some(key.clone());
        map.insert(key, value);
    }
    Ok(map)
}

pub fn map_encode_size<K, V>(map: &BTreeMap<K, V>) -> usize
where
    K: EncodeSize,
    V: EncodeSize,
{
    4 + map
        .iter()
        .map(|(k, v)| k.encode_size() + v.encode_size())
        .sum::<usize>()
}

/// Write an ordered map keyed by `String`, using the length-prefixed string
/// encoding for keys since `String` has no native codec impl.
pub fn write_string_map<V>(map: &BTreeMap<String, V>, writer: &mut impl BufMut)
where
    V: Write,
{
    (map.len() as u32).write(writer);
    for (key, value) in map {
        write_string(key, writer);
        value.write(writer);
    }
}

/// Read an ordered map keyed by `String`, enforcing strictly ascending keys.
pub fn read_string_map<V>(
    reader: &mut impl Buf,
    max_len: usize,
    max_key_len: usize,
    cfg: &V::Cfg,
) -> Result<BTreeMap<String, V>, Error>
where
    V: Read,
{
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Map", "too long"));
    }
    let mut map = BTreeMap::new();
    let mut last: Option<String> = None;
    for _ in 0..len {
        let key = read_string(reader, max_key_len)?;
        if let Some(prev) = &last {
            if *prev >= key {
                return Err(Error::Invalid("Map", "keys not strictly ascending"));
            }
        }
        let value = V::read_cfg(reader, cfg)?;
        last = Some(key.clone());
        map.insert(key, value);
    }
    Ok(map)
}

/// Encoded size of a `String`-keyed map.
pub fn string_map_encode_size<V>(map: &BTreeMap<String, V>) -> usize
where
    V: EncodeSize,
{
    4 + map
        .iter()
        .map(|(k, v)| string_encode_size(k) + v.encode_size())
        .sum::<usize>()
}

/// Write an ordered set as `u32` length followed by elements in order.
pub fn write_set<T>(set: &BTreeSet<T>, writer: &mut impl BufMut)
where
    T: Write + Ord,
{
    (set.len() as u32).write(writer);
    for item in set {
        item.write(writer);
    }
}

/// Read an ordered set, enforcing strictly ascending elements.
pub fn read_set<T>(reader: &mut impl Buf, max_len: usize) -> Result<BTreeSet<T>, Error>
where
    T: Read<Cfg = ()> + Ord + Clone,
{
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Set", "too long"));
    }
    let mut set = BTreeSet::new();
    let mut last: Option<T> = None;
    for _ in 0..len {
        let item = T::read_cfg(reader, &())?;
        if let Some(prev) = &last {
            if *prev >= item {
                return Err(Error::Invalid("Set", "elements not strictly ascending"));
            }
        }
        last = Some(item.clone());
        set.insert(item);
    }
    Ok(set)
}

pub fn set_encode_size<T>(set: &BTreeSet<T>) -> usize
where
    T: EncodeSize,
{
    4 + set.iter().map(EncodeSize::encode_size).sum::<usize>()
}

/// Write a vector as `u32` length followed by elements in sequence order.
pub fn write_vec<T>(vec: &[T], writer: &mut impl BufMut)
where
    T: Write,
{
    (vec.len() as u32).write(writer);
    for item in vec {
        item.write(writer);
    }
}

/// Read a vector of at most `max_len` elements.
pub fn read_vec<T>(reader: &mut impl Buf, max_len: usize) -> Result<Vec<T>, Error>
where
    T: Read<Cfg = ()>,
{
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Vec", "too long"));
    }
    let mut vec = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        vec.push(T::read_cfg(reader, &())?);
    }
    Ok(vec)
}

pub fn vec_encode_size<T>(vec: &[T]) -> usize
where
    T: EncodeSize,
{
    4 + vec.iter().map(EncodeSize::encode_size).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Coord;

    #[test]
    fn string_round_trip() {
        let mut buf = Vec::new();
        write_string("hunter two", &mut buf);
        assert_eq!(buf.len(), string_encode_size("hunter two"));
        let mut reader = buf.as_slice();
        assert_eq!(read_string(&mut reader, 255).unwrap(), "hunter two");
    }

    #[test]
    fn string_rejects_too_long() {
        let mut buf = Vec::new();
        write_string("abcdef", &mut buf);
        let mut reader = buf.as_slice();
        assert!(read_string(&mut reader, 3).is_err());
    }

    #[test]
    fn signed_helpers_round_trip() {
        let mut buf = Vec::new();
        write_i32(-1, &mut buf);
        write_i64(-42, &mut buf);
        let mut reader = buf.as_slice();
        assert_eq!(read_i32(&mut reader).unwrap(), -1);
        assert_eq!(read_i64(&mut reader).unwrap(), -42);
    }

    #[test]
    fn map_rejects_unsorted_keys() {
        let mut buf = Vec::new();
        2u32.write(&mut buf);
        Coord::new(5, 5).write(&mut buf);
        write_i32(1, &mut buf);
        Coord::new(1, 1).write(&mut buf);
        write_i32(2, &mut buf);
        let mut reader = buf.as_slice();
        let res: Result<BTreeMap<Coord, u32>, _> = read_map(&mut reader, 16, &());
        assert!(res.is_err());
    }

    #[test]
    fn readers_survive_malformed_inputs() {
        use rand::{rngs::StdRng, RngCore, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed_c0dec);
        for _ in 0..500 {
            let len = (rng.next_u32() as usize) % 256;
            let mut buf = vec![0u8; len];
            rng.fill_bytes(&mut buf);

            let mut reader = buf.as_slice();
            if let Ok(s) = read_string(&mut reader, 64) {
                assert!(s.len() <= 64);
            }

            let mut reader = buf.as_slice();
            let map: Result<BTreeMap<Coord, u32>, _> = read_map(&mut reader, 16, &());
            if let Ok(map) = map {
                assert!(map.len() <= 16);
            }
        }
    }

    #[test]
    fn set_round_trip() {
        let set: BTreeSet<Coord> = [Coord::new(1, 2), Coord::new(2, 1), Coord::new(0, 0)]
            .into_iter()
            .collect();
        let mut buf = Vec::new();
        write_set(&set, &mut buf);
        assert_eq!(buf.len(), set_encode_size(&set));
        let mut reader = buf.as_slice();
        let back: BTreeSet<Coord> = read_set(&mut reader, 16).unwrap();
        assert_eq!(back, set);
    }
}
