//! The record store.
//!
//! A store is a pair of files: `<name>.db`, a flat append-only sequence of
//! length-prefixed encoded records, and `<name>.idx`, one serialized blob
//! holding the primary-key index as of the last successful close. The store
//! routes every operation through the codec, the data file, the primary
//! index and any registered secondary indexes.
//!
//! Frames are appended at the write cursor and never moved, rewritten or
//! compacted: `update` and `delete` orphan the old bytes, so the data file
//! grows without bound under churn. The optional [`FreeTree`] a store can
//! carry tracks block accounting for the session but is never consulted for
//! record placement.
//!
//! Single-threaded by design (no internal locking); every mutating
//! operation takes `&mut self`.

use std::fs;
use std::hash::Hash;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::error::{LarderError, Result};
use crate::free::FreeTree;
use crate::index::{PkIndex, SecondaryIndex};
use crate::io::StdFileIo;

/// Bytes of the fixed-width little-endian length prefix in front of every
/// encoded record.
pub const FRAME_PREFIX_SIZE: usize = 4;

/// How [`Store::open`] treats existing backing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Delete any existing backing files, then create fresh ones.
    Overwrite,
    /// Create fresh backing files; fail if either already exists.
    Create,
    /// Create backing files only when absent, otherwise open as-is.
    OpenOrCreate,
    /// Open existing backing files; fail when they are missing.
    Open,
}

/// Configuration supplied when opening a [`Store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Block capacity of the session's free-space tree, when one is wanted.
    pub free_space_blocks: Option<u64>,
}

impl StoreOptions {
    /// Creates options with default settings (no free-space tree).
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives the store a session-lifetime [`FreeTree`] over `blocks` blocks,
    /// reachable through [`Store::free_space`].
    pub fn free_space_blocks(mut self, blocks: u64) -> Self {
        self.free_space_blocks = Some(blocks);
        self
    }
}

/// Key-addressed record store over a data/index file pair.
///
/// `K` is the primary key type extracted from each record by the key
/// function; `D` is the record type; `C` the codec used for records, the
/// persisted primary index and derived-key bucketing.
pub struct Store<K, D, C = JsonCodec> {
    name: String,
    data: StdFileIo,
    index_file: StdFileIo,
    codec: C,
    key_fn: Box<dyn Fn(&D) -> K>,
    /// Offset of the first unused byte in the data file.
    cursor: u64,
    pk: PkIndex<K>,
    indexes: FxHashMap<String, SecondaryIndex<D>>,
    free: Option<FreeTree>,
    closed: bool,
}

impl<K, D, C> std::fmt::Debug for Store<K, D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("cursor", &self.cursor)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<K, D, C> Store<K, D, C>
where
    K: Eq + Hash + Serialize + DeserializeOwned + 'static,
    D: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    C: Codec + Clone + 'static,
{
    /// Opens the store `<dir>/<name>.{db,idx}` with default options.
    ///
    /// `key_fn` extracts the primary key from a record and must be pure:
    /// the same record always yields the same key.
    pub fn open<F>(
        dir: impl AsRef<Path>,
        name: &str,
        codec: C,
        key_fn: F,
        mode: OpenMode,
    ) -> Result<Self>
    where
        F: Fn(&D) -> K + 'static,
    {
        Self::open_with(dir, name, codec, key_fn, mode, StoreOptions::default())
    }

    /// Opens the store with explicit [`StoreOptions`].
    ///
    /// On creation an empty primary index is written to the index file. On
    /// every open the whole index file is deserialized and the write cursor
    /// recomputed as `max(offset) + frame length`, or zero when the index
    /// is empty.
    pub fn open_with<F>(
        dir: impl AsRef<Path>,
        name: &str,
        codec: C,
        key_fn: F,
        mode: OpenMode,
        options: StoreOptions,
    ) -> Result<Self>
    where
        F: Fn(&D) -> K + 'static,
    {
        let dir = dir.as_ref();
        let data_path = dir.join(format!("{name}.db"));
        let index_path = dir.join(format!("{name}.idx"));
        let data_exists = data_path.exists();
        let index_exists = index_path.exists();

        match mode {
            OpenMode::Create => {
                if data_exists || index_exists {
                    return Err(LarderError::AlreadyExists(format!(
                        "store '{name}' in {}",
                        dir.display()
                    )));
                }
                Self::create_files(dir, &data_path, &index_path, &codec)?;
            }
            OpenMode::Overwrite => {
                if data_exists {
                    fs::remove_file(&data_path)?;
                }
                if index_exists {
                    fs::remove_file(&index_path)?;
                }
                Self::create_files(dir, &data_path, &index_path, &codec)?;
            }
            OpenMode::OpenOrCreate => {
                if !data_exists && !index_exists {
                    Self::create_files(dir, &data_path, &index_path, &codec)?;
                } else if data_exists != index_exists {
                    return Err(LarderError::Corruption(format!(
                        "store '{name}' file pair out of sync in {}",
                        dir.display()
                    )));
                }
            }
            OpenMode::Open => {
                if !data_exists || !index_exists {
                    return Err(LarderError::NotFound(format!(
                        "store '{name}' in {}",
                        dir.display()
                    )));
                }
            }
        }

        let data = StdFileIo::open(&data_path)?;
        let index_file = StdFileIo::open(&index_path)?;
        let pk: PkIndex<K> = codec.decode(&read_frame(&index_file, 0)?)?;

        let cursor = match pk.offsets().max() {
            None => 0,
            Some(max_offset) => {
                let payload_len = frame_payload_len(&data, max_offset)? as u64;
                max_offset + FRAME_PREFIX_SIZE as u64 + payload_len
            }
        };

        let free = options.free_space_blocks.map(FreeTree::new);
        info!(name, mode = ?mode, records = pk.len(), cursor, "store.open");

        Ok(Self {
            name: name.to_string(),
            data,
            index_file,
            codec,
            key_fn: Box::new(key_fn),
            cursor,
            pk,
            indexes: FxHashMap::default(),
            free,
            closed: false,
        })
    }

    fn create_files(dir: &Path, data_path: &Path, index_path: &Path, codec: &C) -> Result<()> {
        fs::create_dir_all(dir)?;
        let data = StdFileIo::create_new(data_path)?;
        data.sync_all()?;
        let index_file = StdFileIo::create_new(index_path)?;
        let payload = codec.encode(&PkIndex::<K>::new())?;
        write_frame(&index_file, 0, &payload)?;
        index_file.sync_all()?;
        debug!(data = %data_path.display(), "store.create_files");
        Ok(())
    }

    /// Name this store was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the record stored under `key`.
    pub fn read(&self, key: &K) -> Result<D> {
        let offset = self
            .pk
            .get(key)
            .ok_or_else(|| LarderError::NotFound("primary key".into()))?;
        let payload = read_frame(&self.data, offset)?;
        self.codec.decode(&payload)
    }

    /// Reads one record per input key, lazily and in input order.
    ///
    /// Nothing is read until the iterator is consumed; the iterator borrows
    /// the store, so the store cannot be closed while it is live.
    pub fn read_many<'a, I>(&'a self, keys: I) -> impl Iterator<Item = Result<D>> + 'a
    where
        I: IntoIterator<Item = K>,
        I::IntoIter: 'a,
    {
        keys.into_iter().map(move |key| self.read(&key))
    }

    /// Appends `record` and registers it under its extracted key.
    ///
    /// Fails with `DuplicateKey` when the key is already stored; the data
    /// file is not touched in that case.
    pub fn insert(&mut self, record: &D) -> Result<()> {
        let key = (self.key_fn)(record);
        if self.pk.contains(&key) {
            return Err(LarderError::DuplicateKey("primary key already present".into()));
        }
        self.append_record(key, record)
    }

    /// Replaces the record stored under `record`'s key.
    ///
    /// Delete-then-append: the old frame's bytes are orphaned, the new
    /// record lands at the write cursor. The two steps are not atomic with
    /// respect to a crash between them. Fails with `NotFound` when the key
    /// was never stored.
    pub fn update(&mut self, record: &D) -> Result<()> {
        let key = (self.key_fn)(record);
        self.delete(&key)?;
        self.append_record(key, record)
    }

    /// Removes `key` from the primary index and its record from every
    /// registered secondary index. The record's bytes stay in the data
    /// file; they are never erased or reclaimed.
    pub fn delete(&mut self, key: &K) -> Result<()> {
        // The stored record is needed to unlink derived-key entries.
        let record = self.read(key)?;
        self.pk.remove(key);
        for index in self.indexes.values_mut() {
            index.remove(&record)?;
        }
        debug!("store.delete");
        Ok(())
    }

    fn append_record(&mut self, key: K, record: &D) -> Result<()> {
        let payload = self.codec.encode(record)?;
        let offset = self.cursor;
        write_frame(&self.data, offset, &payload)?;
        self.cursor = offset + (FRAME_PREFIX_SIZE + payload.len()) as u64;
        self.pk.insert(key, offset)?;
        for index in self.indexes.values_mut() {
            index.add(record)?;
        }
        debug!(offset, len = payload.len(), "store.append");
        Ok(())
    }

    /// Builds and registers a secondary index over `index_fn`'s derived key.
    ///
    /// Scans every currently stored record. Fails with `AlreadyExists` when
    /// `name` is taken, and a unique build fails with `DuplicateKey` on the
    /// first derived-key collision, leaving nothing registered.
    pub fn create_index<I, F>(&mut self, name: &str, index_fn: F, unique: bool) -> Result<()>
    where
        I: Serialize,
        F: Fn(&D) -> I + 'static,
    {
        if self.indexes.contains_key(name) {
            return Err(LarderError::AlreadyExists(format!("index '{name}'")));
        }
        let codec = self.codec.clone();
        let extract: Box<dyn Fn(&D) -> Result<Vec<u8>>> =
            Box::new(move |record| codec.encode(&index_fn(record)));
        let mut index = SecondaryIndex::new(extract, unique);

        let offsets: Vec<u64> = self.pk.offsets().collect();
        for offset in offsets {
            let payload = read_frame(&self.data, offset)?;
            let record: D = self.codec.decode(&payload)?;
            index.add(&record)?;
        }
        debug!(name, unique, entries = index.len(), "store.create_index");
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Looks up records in the named secondary index.
    ///
    /// Unique indexes yield exactly one record, or `NotFound` when the
    /// derived key is absent; non-unique indexes yield the possibly empty
    /// bucket for the key. An unregistered `name` is `NotFound`.
    pub fn query_index<I: Serialize>(&self, name: &str, key: &I) -> Result<Vec<D>> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| LarderError::NotFound(format!("index '{name}'")))?;
        let derived = self.codec.encode(key)?;
        index.lookup(&derived)
    }

    /// All primary keys, in the index's own iteration order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.pk.keys()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.pk.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.pk.is_empty()
    }

    /// True when `key` is stored.
    pub fn contains_key(&self, key: &K) -> bool {
        self.pk.contains(key)
    }

    /// The session's free-space tree, when one was configured through
    /// [`StoreOptions::free_space_blocks`].
    ///
    /// The tree is the caller's to drive: record placement never consults
    /// it, appends always land at the write cursor.
    pub fn free_space(&mut self) -> Option<&mut FreeTree> {
        self.free.as_mut()
    }

    /// Persists the primary index to the index file, flushes both files and
    /// releases their handles.
    ///
    /// Handles are released on every path; when index serialization fails
    /// the data-file flush is still attempted and the index error reported.
    /// Registered secondary indexes are discarded, never persisted.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let index_result = self.persist_index();
        let data_result = self.data.sync_all();
        info!(name = %self.name, records = self.pk.len(), "store.close");
        index_result?;
        data_result
    }

    fn persist_index(&mut self) -> Result<()> {
        let payload = self.codec.encode(&self.pk)?;
        self.index_file.truncate(0)?;
        write_frame(&self.index_file, 0, &payload)?;
        self.index_file.sync_all()?;
        debug!(len = payload.len(), "store.index_persisted");
        Ok(())
    }
}

impl<K, D, C> Drop for Store<K, D, C> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                name = %self.name,
                "store dropped without close(); index changes since open are not persisted"
            );
        }
    }
}

/// Reads the length prefix of the frame at `offset`.
fn frame_payload_len(file: &StdFileIo, offset: u64) -> Result<u32> {
    let file_len = file.len()?;
    if offset
        .checked_add(FRAME_PREFIX_SIZE as u64)
        .map_or(true, |end| end > file_len)
    {
        return Err(LarderError::Corruption(format!(
            "frame prefix at offset {offset} extends past end of file"
        )));
    }
    let mut prefix = [0u8; FRAME_PREFIX_SIZE];
    file.read_at(offset, &mut prefix)?;
    Ok(u32::from_le_bytes(prefix))
}

/// Reads the payload of the frame at `offset`, bounds-checked.
fn read_frame(file: &StdFileIo, offset: u64) -> Result<Vec<u8>> {
    let payload_len = frame_payload_len(file, offset)? as u64;
    let file_len = file.len()?;
    let start = offset + FRAME_PREFIX_SIZE as u64;
    if start.checked_add(payload_len).map_or(true, |end| end > file_len) {
        return Err(LarderError::Corruption(format!(
            "frame payload at offset {offset} extends past end of file"
        )));
    }
    let mut payload = vec![0u8; payload_len as usize];
    file.read_at(start, &mut payload)?;
    Ok(payload)
}

/// Writes `[u32 LE payload length][payload]` at `offset` as one write.
fn write_frame(file: &StdFileIo, offset: u64, payload: &[u8]) -> Result<()> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| LarderError::InvalidArgument("encoded record exceeds the u32 frame limit"))?;
    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    file.write_at(offset, &frame)?;
    Ok(())
}
