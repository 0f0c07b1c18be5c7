//! Fixed-size chunking and progress arithmetic

use bytes::Bytes;

/// Payload bytes per binary frame; the final chunk of a file may be shorter
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Zero-copy chunks of `data` in ascending offset order
pub fn chunks(data: &Bytes) -> impl Iterator<Item = Bytes> + '_ {
    (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(move |offset| data.slice(offset..(offset + CHUNK_SIZE).min(data.len())))
}

/// Number of binary frames needed for `len` bytes
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// `floor(done / total * 100)`, clamped to 100; an empty file is complete
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) as u128 * 100 / total as u128) as u8
}

/// True when moving from `previous` to `current` crosses a 10 % step
pub(crate) fn crosses_decile(previous: Option<u8>, current: u8) -> bool {
    previous.map_or(true, |p| p / 10 != current / 10)
}
