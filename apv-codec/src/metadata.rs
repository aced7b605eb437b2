//! Key/value metadata side-channel carried in metadata PBUs.
//!
//! Entries are keyed by `(group_id, payload_type[, uuid])`; the uuid only
//! exists for user-defined payloads. A metadata PBU payload opens with a
//! big-endian `u32` byte count of what follows; each entry after it is an
//! escape-coded `(type, size)` pair followed by raw payload bytes, where both
//! numbers use 255-valued continuation bytes: a byte of 255 means "add 255
//! and keep reading".

use byteorder::{BigEndian, ByteOrder};
use sha2::{Digest, Sha256};

use apv_core::Frame;

use crate::error::{ApvError, Result};

/// Payload type tag for user-defined (uuid-keyed) metadata.
pub const METADATA_USER_DEFINED: u32 = 170;

/// uuid under which per-plane reconstruction hashes travel.
pub const FRAME_HASH_UUID: [u8; 16] = [
    0x9f, 0x1c, 0x54, 0x3b, 0x0e, 0x87, 0x4d, 0x21, 0xae, 0x35, 0x62, 0x90, 0x7a, 0x4c, 0xd8, 0x02,
];

/// Bytes of one SHA-256 digest.
pub const HASH_SIZE: usize = 32;

/// Default entry capacity of a [`MetadataStore`].
pub const DEFAULT_CAPACITY: usize = 64;

/// Identity of one metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetadataKey {
    pub group_id: u16,
    pub payload_type: u32,
    /// Present iff `payload_type` is [`METADATA_USER_DEFINED`].
    pub uuid: Option<[u8; 16]>,
}

impl MetadataKey {
    /// Key for a standard payload type.
    pub fn standard(group_id: u16, payload_type: u32) -> Self {
        Self {
            group_id,
            payload_type,
            uuid: None,
        }
    }

    /// Key for a user-defined payload.
    pub fn user_defined(group_id: u16, uuid: [u8; 16]) -> Self {
        Self {
            group_id,
            payload_type: METADATA_USER_DEFINED,
            uuid: Some(uuid),
        }
    }
}

#[derive(Debug, Clone)]
struct MetadataEntry {
    key: MetadataKey,
    data: Vec<u8>,
}

/// Bounded table of metadata entries.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    entries: Vec<MetadataEntry>,
    capacity: usize,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore {
    /// Store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Store holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, key: MetadataKey, data: Vec<u8>) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.data = data;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(ApvError::MetadataFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(MetadataEntry { key, data });
        Ok(())
    }

    /// Look up an entry's payload.
    pub fn get(&self, key: &MetadataKey) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.key == *key)
            .map(|e| e.data.as_slice())
    }

    /// Remove an entry, returning its payload.
    pub fn remove(&mut self, key: &MetadataKey) -> Option<Vec<u8>> {
        let idx = self.entries.iter().position(|e| e.key == *key)?;
        Some(self.entries.remove(idx).data)
    }

    /// Enumerate entry keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &MetadataKey> {
        self.entries.iter().map(|e| &e.key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize every entry of `group_id` into a metadata PBU payload.
    ///
    /// Returns `None` when the group has no entries (no PBU is emitted).
    pub fn to_payload(&self, group_id: u16) -> Option<Vec<u8>> {
        let mut body = Vec::new();
        for entry in self.entries.iter().filter(|e| e.key.group_id == group_id) {
            let uuid_len = if entry.key.uuid.is_some() { 16 } else { 0 };
            write_escaped(&mut body, entry.key.payload_type);
            write_escaped(&mut body, (entry.data.len() + uuid_len) as u32);
            if let Some(uuid) = &entry.key.uuid {
                body.extend_from_slice(uuid);
            }
            body.extend_from_slice(&entry.data);
        }
        if body.is_empty() {
            return None;
        }
        let mut out = vec![0u8; 4];
        BigEndian::write_u32(&mut out[0..4], body.len() as u32);
        out.extend_from_slice(&body);
        Some(out)
    }

    /// Parse a metadata PBU payload into this store under `group_id`.
    pub fn merge_payload(&mut self, group_id: u16, payload: &[u8]) -> Result<()> {
        if payload.len() < 4 {
            return Err(ApvError::malformed("metadata payload shorter than size field"));
        }
        let declared = BigEndian::read_u32(&payload[0..4]) as usize;
        let body = &payload[4..];
        if declared != body.len() {
            return Err(ApvError::malformed(format!(
                "metadata size field {declared} does not match {} payload bytes",
                body.len()
            )));
        }
        let mut off = 0usize;
        while off < body.len() {
            let payload_type = read_escaped(body, &mut off)?;
            let size = read_escaped(body, &mut off)? as usize;
            if size > body.len() - off {
                return Err(ApvError::malformed(format!(
                    "metadata payload size {size} exceeds remaining bytes"
                )));
            }
            let entry = &body[off..off + size];
            off += size;

            let (key, data) = if payload_type == METADATA_USER_DEFINED {
                if entry.len() < 16 {
                    return Err(ApvError::malformed("user-defined metadata without uuid"));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&entry[..16]);
                (MetadataKey::user_defined(group_id, uuid), entry[16..].to_vec())
            } else {
                (MetadataKey::standard(group_id, payload_type), entry.to_vec())
            };
            self.set(key, data)?;
        }
        Ok(())
    }
}

fn write_escaped(out: &mut Vec<u8>, value: u32) {
    let mut v = value;
    while v >= 255 {
        out.push(255);
        v -= 255;
    }
    out.push(v as u8);
}

fn read_escaped(data: &[u8], off: &mut usize) -> Result<u32> {
    let mut value = 0u64;
    loop {
        let byte = *data
            .get(*off)
            .ok_or_else(|| ApvError::malformed("truncated metadata escape code"))?;
        *off += 1;
        value += byte as u64;
        if byte != 255 {
            return Ok(value as u32);
        }
        if value > u32::MAX as u64 {
            return Err(ApvError::malformed("metadata escape code overflow"));
        }
    }
}

/// Concatenated SHA-256 digests of a frame's planes, coded-width only
/// (stride padding excluded), samples hashed as big-endian 16-bit words.
pub fn frame_hash(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.num_planes() * HASH_SIZE);
    for c in 0..frame.num_planes() {
        let plane = match frame.plane(c) {
            Some(p) => p,
            None => continue,
        };
        let mut hasher = Sha256::new();
        for y in 0..plane.height {
            for &sample in plane.row(y) {
                hasher.update(sample.to_be_bytes());
            }
        }
        out.extend_from_slice(&hasher.finalize());
    }
    out
}

/// Record a frame's reconstruction hash under its group id.
pub fn store_frame_hash(store: &mut MetadataStore, group_id: u16, frame: &Frame) -> Result<()> {
    store.set(
        MetadataKey::user_defined(group_id, FRAME_HASH_UUID),
        frame_hash(frame),
    )
}

/// Check a decoded frame against the hash carried in the bitstream.
///
/// `Ok(None)` when no hash metadata is present.
pub fn verify_frame_hash(
    store: &MetadataStore,
    group_id: u16,
    frame: &Frame,
) -> Result<Option<bool>> {
    let key = MetadataKey::user_defined(group_id, FRAME_HASH_UUID);
    let Some(expected) = store.get(&key) else {
        return Ok(None);
    };
    if expected.len() != frame.num_planes() * HASH_SIZE {
        return Err(ApvError::malformed("frame hash metadata of wrong length"));
    }
    Ok(Some(expected == frame_hash(frame).as_slice()))
}
