//! On-disk image of a group.
//!
//! ```text
//! +-------+---------+----------+--------------+----------------+
//! | magic | format  | reserved | commit stamp | CBOR(group)    |
//! | HRLM  | u16 LE  | u16      | u64 LE       | ...            |
//! +-------+---------+----------+--------------+----------------+
//! ```

use crate::error::{StorageError, StorageResult};
use crate::group::Group;

/// Magic bytes opening every image.
pub const IMAGE_MAGIC: [u8; 4] = *b"HRLM";

/// Current image format version.
pub const IMAGE_FORMAT: u16 = 1;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 16;

/// Encodes a group and its commit stamp.
pub fn encode(group: &Group, stamp: u64) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 256);
    buf.extend_from_slice(&IMAGE_MAGIC);
    buf.extend_from_slice(&IMAGE_FORMAT.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&stamp.to_le_bytes());
    ciborium::into_writer(group, &mut buf).map_err(StorageError::codec)?;
    Ok(buf)
}

/// Decodes an image into its group (with rebuilt indexes) and commit stamp.
pub fn decode(data: &[u8]) -> StorageResult<(Group, u64)> {
    let stamp = read_stamp(data)?;
    let mut group: Group =
        ciborium::from_reader(&data[HEADER_LEN..]).map_err(StorageError::codec)?;
    group.rebuild_indexes();
    Ok((group, stamp))
}

/// Validates the header and returns the commit stamp.
pub fn read_stamp(data: &[u8]) -> StorageResult<u64> {
    if data.len() < HEADER_LEN {
        return Err(StorageError::corrupted("image too short"));
    }
    if data[0..4] != IMAGE_MAGIC {
        return Err(StorageError::corrupted("invalid image magic"));
    }
    let format = u16::from_le_bytes([data[4], data[5]]);
    if format > IMAGE_FORMAT {
        return Err(StorageError::corrupted(format!(
            "unsupported image format: {format}"
        )));
    }
    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(&data[8..16]);
    Ok(u64::from_le_bytes(stamp))
}
