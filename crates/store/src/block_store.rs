// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use thiserror::Error;
use tracing::info;

use crate::keys::{
    block_key, block_value, chunk_key, chunk_value, coord_key, decode_i32, decode_u64, encode_i32,
};
use crate::BlockRow;

/// Key under which the rowid counter lives in the `sequences` partition.
const ROWID_SEQUENCE: &str = "rowid";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine failure: {0}")]
    Storage(#[from] fjall::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt {0} entry")]
    Corrupt(&'static str),
}

/// The durable block repository. One row per `(p, q, x, y, z)`; repeat writes
/// replace the row and stamp it with a fresh rowid.
///
/// The store is only ever touched from the world model's event loop, so there
/// is no locking discipline here beyond what fjall does internally. Writes
/// accumulate in the keyspace journal and become durable on [`Self::commit`].
pub struct BlockStore {
    _tmpdir: Option<tempfile::TempDir>,
    keyspace: Keyspace,
    /// Unique index: `(p, q, x, y, z)` -> `(rowid, w)`.
    blocks: PartitionHandle,
    /// Scan index: `(p, q, rowid)` -> `(x, y, z, w)`. Exactly one live entry
    /// per stored coordinate; superseded entries are removed on upsert.
    chunks: PartitionHandle,
    /// Secondary index: `(x, y, z, p, q)` -> `w`.
    coords: PartitionHandle,
    sequences: PartitionHandle,
    next_rowid: u64,
}

impl BlockStore {
    /// Open the store at `path`, creating it if absent. With no path, the
    /// store lives in a temporary directory that is removed on drop.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let (tmpdir, path) = match path {
            Some(path) => (None, path.to_path_buf()),
            None => {
                let tmpdir = tempfile::TempDir::new()?;
                let path = tmpdir.path().to_path_buf();
                (Some(tmpdir), path)
            }
        };

        info!("Opening block database at {:?}", path);
        let keyspace = Config::new(&path).open()?;
        let blocks = keyspace.open_partition("blocks", PartitionCreateOptions::default())?;
        let chunks = keyspace.open_partition("chunks", PartitionCreateOptions::default())?;
        let coords = keyspace.open_partition("coords", PartitionCreateOptions::default())?;
        let sequences = keyspace.open_partition("sequences", PartitionCreateOptions::default())?;

        // Rowid 0 is the "nothing received yet" cursor sentinel, so the
        // counter starts handing out ids at 1.
        let next_rowid = match sequences.get(ROWID_SEQUENCE)? {
            Some(raw) if raw.len() == 8 => decode_u64(&raw),
            Some(_) => return Err(StoreError::Corrupt("sequence")),
            None => 1,
        };

        Ok(Self {
            _tmpdir: tmpdir,
            keyspace,
            blocks,
            chunks,
            coords,
            sequences,
            next_rowid,
        })
    }

    /// Insert or replace the row at `(p, q, x, y, z)`, returning the rowid
    /// assigned to it.
    pub fn upsert(&mut self, p: i32, q: i32, x: i32, y: i32, z: i32, w: i32) -> Result<u64, StoreError> {
        let key = block_key(p, q, x, y, z);

        // A replaced row surrenders its slot in the scan index, otherwise a
        // catch-up scan would replay stale kinds for the coordinate.
        if let Some(prev) = self.blocks.get(key)? {
            if prev.len() != 12 {
                return Err(StoreError::Corrupt("block"));
            }
            let prev_rowid = decode_u64(&prev[0..8]);
            self.chunks.remove(chunk_key(p, q, prev_rowid))?;
        }

        let rowid = self.next_rowid;
        self.next_rowid += 1;
        self.sequences
            .insert(ROWID_SEQUENCE, self.next_rowid.to_be_bytes())?;

        self.blocks.insert(key, block_value(rowid, w))?;
        self.chunks
            .insert(chunk_key(p, q, rowid), chunk_value(x, y, z, w))?;
        self.coords.insert(coord_key(x, y, z, p, q), encode_i32(w))?;
        Ok(rowid)
    }

    /// All rows in chunk `(p, q)` with `rowid > after`, in rowid order.
    pub fn scan_chunk(&self, p: i32, q: i32, after: u64) -> Result<Vec<BlockRow>, StoreError> {
        let first = chunk_key(p, q, after.saturating_add(1));
        let last = chunk_key(p, q, u64::MAX);

        let mut rows = Vec::new();
        for entry in self.chunks.range(first..=last) {
            let (key, value) = entry.map_err(fjall::Error::from)?;
            if key.len() != 16 || value.len() != 16 {
                return Err(StoreError::Corrupt("chunk"));
            }
            rows.push(BlockRow {
                rowid: decode_u64(&key[8..16]),
                x: decode_i32(&value[0..4]),
                y: decode_i32(&value[4..8]),
                z: decode_i32(&value[8..12]),
                w: decode_i32(&value[12..16]),
            });
        }
        Ok(rows)
    }

    /// Flush pending writes durably.
    pub fn commit(&self) -> Result<(), StoreError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
