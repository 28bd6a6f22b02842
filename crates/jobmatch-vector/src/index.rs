//! Exact-similarity vector store with durable per-collection persistence.
//!
//! Each collection is a flat array of L2-normalized vectors searched by inner
//! product, paired with a mapping table from namespaced external IDs
//! (`"{collection}:{id}"`) to dense slots. Both are written side by side in
//! the index directory on every mutation:
//!
//! - `{collection}.index` holds the raw vectors (little-endian `f32`)
//! - `{collection}_mappings.json` holds the slot-ordered ID list
//!
//! Every write stamps both files with a fresh write token. A pair whose
//! tokens differ (a crash between the two writes) is not trusted.
//!
//! Writers are serialized per collection and publish a fully built
//! replacement, so concurrent readers only ever see a complete snapshot.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobmatch_core::error::{MatchError, Result};
use jobmatch_core::types::ScoredId;

const INDEX_MAGIC: &[u8; 4] = b"JMFX";
const INDEX_VERSION: u32 = 2;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 16;

// =============================================================================
// Flat index
// =============================================================================

/// A dense, append-only array of vectors of one fixed dimension.
///
/// Slots are positions in the array. There is no in-place removal: deletes
/// go through a rebuild that re-adds the survivors into a fresh index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector at the next free slot. The caller checks the dimension.
    fn push(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        self.data.extend_from_slice(vector);
    }

    /// The vector stored at `slot`.
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Score every slot against `query` by inner product and return the best
    /// `k` as `(slot, score)`, highest first, ties broken by ascending slot.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let k = k.min(self.len());
        if k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, vector)| (slot, inner_product(query, vector)))
            .collect();

        // Stable sort keeps slot order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn to_bytes(&self, token: &Uuid) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(token.as_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decode an index file into the index and the write token in its header.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, Uuid)> {
        if bytes.len() < HEADER_LEN {
            return Err(MatchError::CorruptState(format!(
                "index file too short ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != INDEX_MAGIC {
            return Err(MatchError::CorruptState("bad index magic".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != INDEX_VERSION {
            return Err(MatchError::CorruptState(format!(
                "unsupported index version {}",
                version
            )));
        }
        let dimension = read_u32(&bytes[8..12]) as usize;
        let count = u64::from_le_bytes([
            bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
        ]) as usize;
        let token = Uuid::from_slice(&bytes[20..36])
            .map_err(|e| MatchError::CorruptState(format!("bad write token: {}", e)))?;

        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| MatchError::CorruptState("index header overflows".to_string()))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(MatchError::CorruptState(format!(
                "index payload is {} bytes, header declares {}",
                payload.len(),
                expected
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok((Self { dimension, data }, token))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// =============================================================================
// Collections
// =============================================================================

/// On-disk mapping table: slot-ordered list of namespaced IDs.
#[derive(Debug, Serialize, Deserialize)]
struct MappingFile {
    collection: String,
    dimension: usize,
    /// Must equal the token in the index header written alongside.
    token: Uuid,
    ids: Vec<String>,
}

/// One consistent view of a collection: the index plus its mapping table.
#[derive(Debug)]
struct Snapshot {
    index: FlatIndex,
    /// `slots[i]` is the namespaced ID of slot `i`.
    slots: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl Snapshot {
    fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            slots: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn from_parts(index: FlatIndex, slots: Vec<String>) -> Self {
        let lookup = slots
            .iter()
            .enumerate()
            .map(|(slot, id)| (id.clone(), slot))
            .collect();
        Self {
            index,
            slots,
            lookup,
        }
    }

    /// Copy the slots not in `removed` into a fresh index, keeping their order.
    fn survivors(&self, removed: &HashSet<&str>) -> (FlatIndex, Vec<String>) {
        let mut index = FlatIndex::new(self.index.dimension());
        let mut slots = Vec::with_capacity(self.slots.len());
        for (slot, id) in self.slots.iter().enumerate() {
            if removed.contains(id.as_str()) {
                continue;
            }
            if let Some(vector) = self.index.vector(slot) {
                index.push(vector);
                slots.push(id.clone());
            }
        }
        (index, slots)
    }
}

/// Lifecycle state of a collection as seen by [`VectorStore::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// Never written and no index file on disk.
    Uninitialized,
    /// Initialized but holding no vectors.
    Empty,
    /// Holding at least one vector.
    Populated,
}

/// Read-only statistics for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub collection: String,
    pub state: CollectionState,
    pub count: usize,
    pub dimension: usize,
    pub mapped_ids: usize,
    pub index_path: PathBuf,
}

#[derive(Debug)]
struct Collection {
    name: String,
    index_path: PathBuf,
    mapping_path: PathBuf,
    initialized: RwLock<bool>,
    writer: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
}

impl Collection {
    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let current = self
            .current
            .read()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(Arc::clone(&current))
    }

    fn publish(&self, snapshot: Snapshot) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        *current = Arc::new(snapshot);
        drop(current);

        let mut initialized = self
            .initialized
            .write()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        *initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.read().map(|i| *i).unwrap_or(false)
    }

    fn namespaced(&self, id: &str) -> String {
        format!("{}:{}", self.name, id)
    }

    /// Write index and mapping via temp file + rename.
    fn persist(&self, index: &FlatIndex, slots: &[String]) -> Result<()> {
        let token = Uuid::new_v4();
        let mapping = MappingFile {
            collection: self.name.clone(),
            dimension: index.dimension(),
            token,
            ids: slots.to_vec(),
        };
        write_atomic(&self.index_path, &index.to_bytes(&token))?;
        write_atomic(&self.mapping_path, &serde_json::to_vec_pretty(&mapping)?)?;
        debug!(
            collection = %self.name,
            count = index.len(),
            %token,
            path = %self.index_path.display(),
            "Persisted collection"
        );
        Ok(())
    }
}

/// Temp sibling of `path`: the full file name plus `.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// =============================================================================
// VectorStore
// =============================================================================

/// Durable, exact nearest-neighbor store with one index per collection.
///
/// Collections are created lazily: the first access loads `{name}.index` and
/// `{name}_mappings.json` if they exist. Every mutation rewrites both files
/// before returning.
#[derive(Debug)]
pub struct VectorStore {
    index_dir: PathBuf,
    dimension: usize,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl VectorStore {
    /// Open a store rooted at `index_dir`, creating the directory if needed.
    pub fn open(index_dir: impl Into<PathBuf>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(MatchError::InvalidInput(
                "vector dimension must be > 0".to_string(),
            ));
        }
        let index_dir = index_dir.into();
        fs::create_dir_all(&index_dir)?;
        info!(
            path = %index_dir.display(),
            dimension,
            "Opened vector store"
        );
        Ok(Self {
            index_dir,
            dimension,
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Insert or replace vectors under the given external IDs.
    ///
    /// Rejects the whole batch (no mutation) if the lengths differ, an ID is
    /// empty, or a vector has the wrong dimension. A repeated ID inside one
    /// batch keeps its last occurrence.
    pub fn upsert(&self, collection: &str, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(MatchError::InvalidInput(format!(
                "{} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(pos) = ids.iter().position(|id| id.is_empty()) {
            return Err(MatchError::InvalidInput(format!("empty id at position {}", pos)));
        }
        if let Some((pos, v)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != self.dimension)
        {
            return Err(MatchError::InvalidInput(format!(
                "vector {} has dimension {}, expected {}",
                pos,
                v.len(),
                self.dimension
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let coll = self.collection(collection)?;
        let _guard = coll
            .writer
            .lock()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        let current = coll.snapshot()?;

        let namespaced: Vec<String> = ids.iter().map(|id| coll.namespaced(id)).collect();
        let mut last_occurrence: HashMap<&str, usize> = HashMap::new();
        for (pos, id) in namespaced.iter().enumerate() {
            last_occurrence.insert(id.as_str(), pos);
        }
        let replaced: HashSet<&str> = last_occurrence.keys().copied().collect();

        let (mut index, mut slots) = current.survivors(&replaced);
        for (pos, id) in namespaced.iter().enumerate() {
            if last_occurrence.get(id.as_str()) != Some(&pos) {
                continue;
            }
            let mut vector = vectors[pos].clone();
            normalize(&mut vector);
            index.push(&vector);
            slots.push(id.clone());
        }

        coll.persist(&index, &slots)?;
        let count = index.len();
        coll.publish(Snapshot::from_parts(index, slots))?;

        info!(
            collection = %coll.name,
            upserted = replaced.len(),
            total = count,
            "Upserted vectors"
        );
        Ok(())
    }

    /// Return up to `k` external IDs most similar to `query`.
    pub fn search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        if query.len() != self.dimension {
            return Err(MatchError::InvalidInput(format!(
                "query has dimension {}, expected {}",
                query.len(),
                self.dimension
            )));
        }
        let coll = self.collection(collection)?;
        let snapshot = coll.snapshot()?;
        if snapshot.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut normalized = query.to_vec();
        normalize(&mut normalized);

        let prefix = format!("{}:", coll.name);
        let hits = snapshot
            .index
            .search(&normalized, k)
            .into_iter()
            .filter_map(|(slot, score)| {
                let full_id = snapshot.slots.get(slot)?;
                let id = full_id.strip_prefix(&prefix)?;
                Some(ScoredId::new(id, score))
            })
            .collect::<Vec<_>>();

        debug!(collection = %coll.name, k, hits = hits.len(), "Vector search");
        Ok(hits)
    }

    /// Remove the given IDs by rebuilding the collection from its survivors.
    ///
    /// Absent IDs are ignored. Returns how many vectors were removed; when
    /// nothing matches, the files are left untouched.
    pub fn delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let coll = self.collection(collection)?;
        let _guard = coll
            .writer
            .lock()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        let current = coll.snapshot()?;

        let namespaced: Vec<String> = ids.iter().map(|id| coll.namespaced(id)).collect();
        let removed: HashSet<&str> = namespaced
            .iter()
            .map(String::as_str)
            .filter(|id| current.lookup.contains_key(*id))
            .collect();
        if removed.is_empty() {
            debug!(collection = %coll.name, "Delete matched no stored ids");
            return Ok(0);
        }

        let (index, slots) = current.survivors(&removed);
        coll.persist(&index, &slots)?;
        let remaining = index.len();
        coll.publish(Snapshot::from_parts(index, slots))?;

        info!(
            collection = %coll.name,
            removed = removed.len(),
            remaining,
            "Deleted vectors"
        );
        Ok(removed.len())
    }

    /// True if `id` currently has a vector in `collection`.
    pub fn contains(&self, collection: &str, id: &str) -> Result<bool> {
        let coll = self.collection(collection)?;
        let snapshot = coll.snapshot()?;
        Ok(snapshot.lookup.contains_key(&coll.namespaced(id)))
    }

    /// Count, dimension and mapping size for one collection.
    pub fn get_stats(&self, collection: &str) -> Result<IndexStats> {
        let coll = self.collection(collection)?;
        let snapshot = coll.snapshot()?;
        let count = snapshot.index.len();
        let state = if !coll.is_initialized() {
            CollectionState::Uninitialized
        } else if count == 0 {
            CollectionState::Empty
        } else {
            CollectionState::Populated
        };
        Ok(IndexStats {
            collection: coll.name.clone(),
            state,
            count,
            dimension: snapshot.index.dimension(),
            mapped_ids: snapshot.lookup.len(),
            index_path: coll.index_path.clone(),
        })
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_collection_name(name)?;
        {
            let collections = self
                .collections
                .read()
                .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
            if let Some(coll) = collections.get(name) {
                return Ok(Arc::clone(coll));
            }
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|e| MatchError::Storage(format!("Lock poisoned: {}", e)))?;
        if let Some(coll) = collections.get(name) {
            return Ok(Arc::clone(coll));
        }
        let coll = Arc::new(self.load_collection(name));
        collections.insert(name.to_string(), Arc::clone(&coll));
        Ok(coll)
    }

    fn load_collection(&self, name: &str) -> Collection {
        let index_path = self.index_dir.join(format!("{}.index", name));
        let mapping_path = self.index_dir.join(format!("{}_mappings.json", name));

        let (snapshot, initialized) = if index_path.exists() {
            match self.read_snapshot(name, &index_path, &mapping_path) {
                Ok(snapshot) => {
                    info!(
                        collection = name,
                        count = snapshot.index.len(),
                        "Loaded collection from disk"
                    );
                    (snapshot, true)
                }
                Err(e) => {
                    warn!(
                        collection = name,
                        path = %index_path.display(),
                        error = %e,
                        "Unusable index state, starting collection empty"
                    );
                    (Snapshot::empty(self.dimension), true)
                }
            }
        } else {
            (Snapshot::empty(self.dimension), false)
        };

        Collection {
            name: name.to_string(),
            index_path,
            mapping_path,
            initialized: RwLock::new(initialized),
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn read_snapshot(&self, name: &str, index_path: &Path, mapping_path: &Path) -> Result<Snapshot> {
        let (index, index_token) = FlatIndex::from_bytes(&fs::read(index_path)?)?;
        if index.dimension() != self.dimension {
            return Err(MatchError::CorruptState(format!(
                "index dimension {} does not match configured {}",
                index.dimension(),
                self.dimension
            )));
        }

        let mapping: MappingFile = match fs::read(mapping_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MatchError::CorruptState(format!(
                    "mapping file {} is missing",
                    mapping_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if mapping.token != index_token {
            return Err(MatchError::CorruptState(format!(
                "mapping token {} does not match index token {}",
                mapping.token, index_token
            )));
        }

        let prefix = format!("{}:", name);
        if mapping.ids.len() != index.len() {
            return Err(MatchError::CorruptState(format!(
                "mapping has {} ids for {} vectors",
                mapping.ids.len(),
                index.len()
            )));
        }
        if mapping.ids.iter().any(|id| !id.starts_with(&prefix)) {
            return Err(MatchError::CorruptState(format!(
                "mapping contains ids outside collection '{}'",
                name
            )));
        }
        let unique: HashSet<&String> = mapping.ids.iter().collect();
        if unique.len() != mapping.ids.len() {
            return Err(MatchError::CorruptState(
                "mapping contains duplicate ids".to_string(),
            ));
        }

        Ok(Snapshot::from_parts(index, mapping.ids))
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(MatchError::InvalidInput(format!(
            "invalid collection name '{}'",
            name
        )))
    }
}
