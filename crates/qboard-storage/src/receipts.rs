//! Local "already voted" receipts, one flag per item id.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use qboard_core::ItemId;
use uuid::Uuid;

/// Key under which the receipt for `id` is persisted.
pub fn receipt_key(id: ItemId) -> String {
    format!("voted_{id}")
}

/// Key-value capability holding vote receipts. Only the sync loop touches it.
pub trait VoteReceiptStore: Send {
    fn has_voted(&self, id: ItemId) -> bool;
    fn record_vote(&mut self, id: ItemId) -> anyhow::Result<()>;
    fn clear_vote(&mut self, id: ItemId) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryReceiptStore {
    voted: HashSet<ItemId>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_votes(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            voted: ids.into_iter().collect(),
        }
    }
}

impl VoteReceiptStore for MemoryReceiptStore {
    fn has_voted(&self, id: ItemId) -> bool {
        self.voted.contains(&id)
    }

    fn record_vote(&mut self, id: ItemId) -> anyhow::Result<()> {
        self.voted.insert(id);
        Ok(())
    }

    fn clear_vote(&mut self, id: ItemId) -> anyhow::Result<()> {
        self.voted.remove(&id);
        Ok(())
    }
}

/// JSON file of `voted_{id} -> voted_at`, rewritten atomically on every change.
#[derive(Debug, Clone)]
pub struct FileReceiptStore {
    path: PathBuf,
    receipts: BTreeMap<String, DateTime<Utc>>,
}

impl FileReceiptStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let receipts = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parsing receipts file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading receipts file {}", path.display()))
            }
        };
        Ok(Self { path, receipts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn voted_at(&self, id: ItemId) -> Option<DateTime<Utc>> {
        self.receipts.get(&receipt_key(id)).copied()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("creating receipts directory {}", parent.display()))?;

        let bytes = serde_json::to_vec_pretty(&self.receipts).context("serializing receipts")?;
        let temp_path = parent.join(format!(".{}.receipts.tmp", Uuid::new_v4()));

        let written = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            });
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(err)
                .with_context(|| format!("writing temp receipts file {}", temp_path.display()));
        }

        if let Err(err) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming receipts {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

impl VoteReceiptStore for FileReceiptStore {
    fn has_voted(&self, id: ItemId) -> bool {
        self.receipts.contains_key(&receipt_key(id))
    }

    fn record_vote(&mut self, id: ItemId) -> anyhow::Result<()> {
        self.receipts.insert(receipt_key(id), Utc::now());
        self.persist()
    }

    fn clear_vote(&mut self, id: ItemId) -> anyhow::Result<()> {
        if self.receipts.remove(&receipt_key(id)).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}
