//! Durable keyed store for capture records
//!
//! On disk a store is a directory holding one `<id>.json` per record and an
//! `index.json` listing ids in insertion order. Every record is also kept in
//! memory, so reads never touch the disk.

use crate::capture::params::CaptureRecord;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";

/// Capture records in insertion order
#[derive(Debug, Default)]
pub struct CaptureStorage {
    dir: Option<PathBuf>,
    records: Vec<CaptureRecord>,
}

impl CaptureStorage {
    /// Store that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a store in `dir`
    ///
    /// Unreadable or inconsistent record files are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let index: Vec<String> = match std::fs::read_to_string(dir.join(INDEX_FILE)) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Record index unreadable, rebuilding");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        for id in &index {
            let Some(path) = record_path(&dir, id) else {
                tracing::warn!(id = %id, "Index entry with an invalid id, skipping");
                continue;
            };
            if let Some(rec) = read_record(&path) {
                if seen.insert(rec.id.clone()) {
                    records.push(rec);
                }
            }
        }

        // Files missing from the index join at the end, oldest first
        let mut orphans = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_record = path.extension().is_some_and(|e| e == "json")
                && path.file_name().is_some_and(|n| n != INDEX_FILE);
            if !is_record {
                continue;
            }
            if let Some(rec) = read_record(&path) {
                if !seen.contains(&rec.id) {
                    orphans.push(rec);
                }
            }
        }
        orphans.sort_by_key(|r| r.timestamp);
        for rec in orphans {
            if seen.insert(rec.id.clone()) {
                records.push(rec);
            }
        }

        tracing::info!(path = %dir.display(), records = records.len(), "Capture storage opened");
        let store = Self {
            dir: Some(dir),
            records,
        };
        store.write_index()?;
        Ok(store)
    }

    /// Directory backing the store, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn generate_id(&self) -> String {
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let id = format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8]);
            if self.position(&id).is_none() {
                return id;
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Store a record
    ///
    /// Saving a record whose id is already stored replaces it in place. Any
    /// other record gets a freshly generated id; ids are never taken from
    /// the caller.
    pub fn save(&mut self, mut record: CaptureRecord) -> Result<CaptureRecord> {
        record.check_lengths()?;
        if self.position(&record.id).is_none() {
            if !record.id.is_empty() {
                tracing::debug!(supplied = %record.id, "Unknown record id replaced");
            }
            record.id = self.generate_id();
        }
        self.persist(&record)?;

        match self.position(&record.id) {
            Some(i) => self.records[i] = record.clone(),
            None => {
                self.records.push(record.clone());
                self.write_index()?;
            }
        }
        tracing::debug!(id = %record.id, "Record saved");
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<&CaptureRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// All records in insertion order
    pub fn list(&self) -> &[CaptureRecord] {
        &self.records
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        let i = self
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let mut updated = self.records[i].clone();
        updated.name = name.to_string();
        self.persist(&updated)?;
        self.records[i] = updated;
        tracing::info!(id, name, "Record renamed");
        Ok(())
    }

    /// Remove a record; unknown ids are a no-op
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let Some(i) = self.position(id) else {
            tracing::debug!(id, "Delete of unknown record ignored");
            return Ok(());
        };
        self.records.remove(i);
        if let Some(dir) = &self.dir {
            let removed = match record_path(dir, id) {
                Some(path) => std::fs::remove_file(path),
                None => Ok(()),
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.write_index()?;
        tracing::info!(id, "Record deleted");
        Ok(())
    }

    fn persist(&self, record: &CaptureRecord) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = record_path(dir, &record.id)
            .ok_or_else(|| Error::InvalidParameters(format!("invalid record id {:?}", record.id)))?;
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)
    }

    fn write_index(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let ids: Vec<&str> = self.records.iter().map(|r| r.id.as_str()).collect();
        write_atomic(&dir.join(INDEX_FILE), &serde_json::to_vec_pretty(&ids)?)
    }
}

/// Ids are plain file stems: no separators, no dots
fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn record_path(dir: &Path, id: &str) -> Option<PathBuf> {
    is_plain_id(id).then(|| dir.join(format!("{id}.json")))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_record(path: &Path) -> Option<CaptureRecord> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Record file unreadable, skipping");
            return None;
        }
    };
    let record: CaptureRecord = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Record file invalid, skipping");
            return None;
        }
    };
    if !is_plain_id(&record.id) {
        tracing::warn!(path = %path.display(), id = %record.id, "Record without a valid id, skipping");
        return None;
    }
    if let Err(e) = record.check_lengths() {
        tracing::warn!(path = %path.display(), error = %e, "Record inconsistent, skipping");
        return None;
    }
    Some(record)
}
