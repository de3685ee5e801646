//! Ghost-cache checkpoints.
//!
//! A warm ghost cache takes a long time to rebuild after a restart, so its
//! recency order can be dumped to disk and replayed. The format is
//! deliberately small: 4-byte magic `"hare"`, then the 4-byte
//! little-endian [`gshash`] of `"hare"` as a hasher-compatibility guard,
//! then LRU-ordered `(key_hash: u32, kv_size: u32)` little-endian records.
//!
//! The guard word exists because checkpoints store key *hashes*: a blob
//! produced under a different hasher (another platform, another hasher
//! version) would silently misattribute every key, so load refuses it with
//! [`CkptError::Incompatible`] instead.
//!
//! The writer skips the usual write-temp-then-rename dance on purpose: a
//! torn checkpoint costs a cold ghost cache, nothing more.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::CkptError;
use crate::ghost::{gshash, AccessMode, SampledGhostCache};

const MAGIC: &[u8; 4] = b"hare";

/// Writes the ghost cache's recency order to `path`.
///
/// # Errors
///
/// Returns [`CkptError::Io`] if the file cannot be created or written.
pub fn save(ghost: &SampledGhostCache, path: &Path) -> Result<(), CkptError> {
    let mut f = BufWriter::new(File::create(path)?);
    f.write_all(MAGIC)?;
    f.write_all(&gshash(MAGIC).to_le_bytes())?;

    let mut io_err: Option<std::io::Error> = None;
    ghost.for_each_lru(|key_hash, kv_size| {
        if io_err.is_some() {
            return;
        }
        let mut rec = [0u8; 8];
        rec[..4].copy_from_slice(&key_hash.to_le_bytes());
        rec[4..].copy_from_slice(&kv_size.to_le_bytes());
        if let Err(e) = f.write_all(&rec) {
            io_err = Some(e);
        }
    });
    if let Some(e) = io_err {
        return Err(e.into());
    }
    f.flush()?;
    Ok(())
}

/// Replays a checkpoint into `ghost`.
///
/// Records are replayed as recency-only accesses from LRU to MRU, so the
/// reloaded cache reproduces the saved order without perturbing hit/miss
/// counters.
///
/// # Errors
///
/// - [`CkptError::Io`] if the file cannot be opened or read.
/// - [`CkptError::Incompatible`] if the magic or the hasher guard word
///   does not match this build.
pub fn load(ghost: &mut SampledGhostCache, path: &Path) -> Result<(), CkptError> {
    let mut f = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CkptError::Incompatible);
    }
    let mut guard = [0u8; 4];
    f.read_exact(&mut guard)?;
    if u32::from_le_bytes(guard) != gshash(MAGIC) {
        return Err(CkptError::Incompatible);
    }

    let mut rec = [0u8; 8];
    loop {
        match f.read_exact(&mut rec) {
            Ok(()) => {
                let key_hash = u32::from_le_bytes(rec[..4].try_into().unwrap());
                let kv_size = u32::from_le_bytes(rec[4..].try_into().unwrap());
                ghost.access_hashed(key_hash, kv_size, AccessMode::Noop);
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
