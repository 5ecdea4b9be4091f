//! JSON-lines file implementation of `AuditStore`.
//!
//! One `AuditRecord` per line, in sequence order:
//!
//! ```text
//! {"id":1,"sequence_number":1,"action":"CREATE",...,"previous_hash":"000…","content_hash":"9f2…"}
//! {"id":2,"sequence_number":2,"action":"UPDATE",...,"previous_hash":"9f2…","content_hash":"c41…"}
//! ```
//!
//! Appends go to the end of the file and are synced before returning.  A
//! failed append truncates the file back to its previous length, so a retry
//! of the same batch never lands after a partial line.  A line left without
//! its newline by a crash is cut off when the log is next opened.
//!
//! The two operations that touch existing lines (`mark_verified` and
//! `replace_chain`) write a sibling temp file and rename it over the log, so
//! a crash leaves either the old or the new file, never a mix.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    record::AuditRecord,
};
use custodian_core::traits::{AuditStore, ScanRange};

use crate::memory::check_batch_follows;

fn io_error(context: &str, path: &Path, err: std::io::Error) -> CustodianError {
    CustodianError::Persistence {
        reason: format!("{} '{}': {}", context, path.display(), err),
    }
}

/// An append-only audit store backed by a JSON-lines file.
///
/// All file access goes through one async mutex, so scans never observe a
/// half-written batch.
#[derive(Debug)]
pub struct JsonLinesAuditStore {
    path: PathBuf,
    /// Last persisted record, cached so the writer's tail lookup is O(1).
    tail: Mutex<Option<AuditRecord>>,
}

impl JsonLinesAuditStore {
    /// Open (or create) the log at `path` and load its tail.
    pub async fn open(path: impl Into<PathBuf>) -> CustodianResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("failed to create audit log directory", parent, e))?;
        }

        repair_torn_tail(&path).await?;
        let records = read_all(&path).await?;
        info!(
            path = %path.display(),
            records = records.len(),
            "audit log opened"
        );

        Ok(Self {
            path,
            tail: Mutex::new(records.into_iter().last()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the file's contents with `records`.
    async fn rewrite(&self, records: &[AuditRecord]) -> CustodianResult<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = File::create(&tmp)
            .await
            .map_err(|e| io_error("failed to create", &tmp, e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| io_error("failed to write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("failed to sync", &tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("failed to replace", &self.path, e))?;
        Ok(())
    }
}

/// Every complete append ends in a newline, so bytes after the last newline
/// are an interrupted write.  Cut them off.
async fn repair_torn_tail(path: &Path) -> CustodianResult<()> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error("failed to read", path, e)),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "truncating torn audit log tail"
    );
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| io_error("failed to open", path, e))?;
    file.set_len(keep as u64)
        .await
        .map_err(|e| io_error("failed to truncate", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| io_error("failed to sync", path, e))?;
    Ok(())
}

async fn write_synced(file: &mut File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.sync_data().await
}

/// Read every record in the file.  A missing file is an empty chain.
async fn read_all(path: &Path) -> CustodianResult<Vec<AuditRecord>> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("failed to open", path, e)),
    };

    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_error("failed to read", path, e))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord =
            serde_json::from_str(&line).map_err(|e| CustodianError::Serialization {
                reason: format!("{} line {}: {}", path.display(), line_no, e),
            })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl AuditStore for JsonLinesAuditStore {
    async fn append_batch(&self, records: &[AuditRecord]) -> CustodianResult<()> {
        let mut tail = self.tail.lock().await;
        check_batch_follows(tail.as_ref().map(|r| r.sequence_number), records)?;

        let mut stored = Vec::with_capacity(records.len());
        let mut buf = Vec::new();
        for record in records {
            let mut record = record.clone();
            record.id = Some(record.sequence_number);
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
            stored.push(record);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("failed to open", &self.path, e))?;
        let start_len = file
            .metadata()
            .await
            .map_err(|e| io_error("failed to stat", &self.path, e))?
            .len();

        if let Err(e) = write_synced(&mut file, &buf).await {
            if let Err(undo) = file.set_len(start_len).await {
                error!(
                    path = %self.path.display(),
                    error = %undo,
                    "failed to roll back partial audit append"
                );
            }
            return Err(io_error("failed to append to", &self.path, e));
        }

        debug!(count = stored.len(), path = %self.path.display(), "audit batch appended");
        if let Some(last) = stored.pop() {
            *tail = Some(last);
        }
        Ok(())
    }

    async fn last_record(&self) -> CustodianResult<Option<AuditRecord>> {
        Ok(self.tail.lock().await.clone())
    }

    async fn scan(&self, range: ScanRange) -> CustodianResult<Vec<AuditRecord>> {
        let _tail = self.tail.lock().await;
        let mut records = read_all(&self.path).await?;
        records.retain(|r| range.contains(&r.entry.created_at));
        records.sort_by_key(|r| r.sequence_number);
        Ok(records)
    }

    async fn mark_verified(&self, ids: &[u64]) -> CustodianResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tail = self.tail.lock().await;
        let mut records = read_all(&self.path).await?;
        for record in records.iter_mut() {
            if record.id.is_some_and(|id| ids.contains(&id)) {
                record.integrity_verified = true;
            }
        }
        self.rewrite(&records).await?;
        *tail = records.pop();
        Ok(())
    }

    async fn replace_chain(&self, mut records: Vec<AuditRecord>) -> CustodianResult<()> {
        records.sort_by_key(|r| r.sequence_number);
        check_batch_follows(None, &records)?;

        let mut tail = self.tail.lock().await;
        for record in records.iter_mut() {
            if record.id.is_none() {
                record.id = Some(record.sequence_number);
            }
        }
        self.rewrite(&records).await?;
        *tail = records.pop();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use custodian_contracts::{record::AuditEntry, taxonomy::AuditAction};
    use custodian_core::chain::{compute_content_hash, stamp_all, ChainTail};

    use super::*;

    fn entries(n: usize) -> Vec<AuditEntry> {
        (0..n)
            .map(|i| AuditEntry::new(AuditAction::Update).entity("WorkOrder", format!("WO-{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("chain.jsonl");

        let store = JsonLinesAuditStore::open(&path).await.unwrap();
        let (first, tail) = stamp_all(None, entries(2)).unwrap();
        store.append_batch(&first).await.unwrap();
        let (second, _) = stamp_all(tail, entries(1)).unwrap();
        store.append_batch(&second).await.unwrap();
        drop(store);

        let reopened = JsonLinesAuditStore::open(&path).await.unwrap();
        let records = reopened.scan(ScanRange::all()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].previous_hash, records[1].content_hash);
        assert_eq!(
            reopened.last_record().await.unwrap().map(|r| ChainTail::of(&r)),
            Some(ChainTail::of(&records[2]))
        );
    }

    #[tokio::test]
    async fn out_of_order_append_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesAuditStore::open(dir.path().join("chain.jsonl"))
            .await
            .unwrap();
        let (records, _) = stamp_all(None, entries(3)).unwrap();

        assert!(store.append_batch(&records[1..]).await.is_err());
        assert!(store.scan(ScanRange::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_verified_rewrites_flags_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesAuditStore::open(dir.path().join("chain.jsonl"))
            .await
            .unwrap();
        let (records, _) = stamp_all(None, entries(2)).unwrap();
        store.append_batch(&records).await.unwrap();

        store.mark_verified(&[1]).await.unwrap();
        let stored = store.scan(ScanRange::all()).await.unwrap();
        assert!(stored[0].integrity_verified);
        assert!(!stored[1].integrity_verified);
        assert_eq!(stored[0].content_hash, records[0].content_hash);
    }

    #[tokio::test]
    async fn computed_float_snapshots_hash_the_same_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let store = JsonLinesAuditStore::open(&path).await.unwrap();

        let entries: Vec<AuditEntry> = (1..=40)
            .map(|i| {
                let quantity = i as f64;
                let unit_price = 0.07;
                let total: f64 = quantity * unit_price;
                let ratio: f64 = 1.0 / quantity;
                AuditEntry::new(AuditAction::Update)
                    .entity("PurchaseOrder", format!("PO-{}", i))
                    .snapshots(None, Some(json!({ "total": total, "ratio": ratio })))
            })
            .collect();
        let (records, _) = stamp_all(None, entries).unwrap();
        store.append_batch(&records).await.unwrap();
        drop(store);

        let reopened = JsonLinesAuditStore::open(&path).await.unwrap();
        let stored = reopened.scan(ScanRange::all()).await.unwrap();
        assert_eq!(stored.len(), 40);
        for record in &stored {
            assert_eq!(
                compute_content_hash(record).unwrap(),
                record.content_hash,
                "sequence {} changed on disk",
                record.sequence_number
            );
        }
    }

    #[tokio::test]
    async fn torn_trailing_line_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let store = JsonLinesAuditStore::open(&path).await.unwrap();
        let (records, _) = stamp_all(None, entries(4)).unwrap();
        store.append_batch(&records[..3]).await.unwrap();
        drop(store);

        // An append interrupted after a few bytes.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":4,\"seq").unwrap();
        drop(file);

        let reopened = JsonLinesAuditStore::open(&path).await.unwrap();
        assert_eq!(reopened.scan(ScanRange::all()).await.unwrap().len(), 3);
        assert_eq!(
            reopened.last_record().await.unwrap().unwrap().sequence_number,
            3
        );

        // The retried batch lands cleanly after the repaired tail.
        reopened.append_batch(&records[3..]).await.unwrap();
        drop(reopened);
        let again = JsonLinesAuditStore::open(&path).await.unwrap();
        let stored = again.scan(ScanRange::all()).await.unwrap();
        assert_eq!(
            stored.iter().map(|r| r.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn corrupt_line_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        std::fs::write(&path, "{\"sequence_number\": \n").unwrap();

        let err = JsonLinesAuditStore::open(&path).await.unwrap_err();
        assert!(matches!(err, CustodianError::Serialization { .. }));
    }
}
