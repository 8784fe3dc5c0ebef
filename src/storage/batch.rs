//! Write buffering in front of a record sink

use crate::site::ExtractedRecord;
use crate::storage::traits::{RecordSink, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Buffers records and writes them in batches
///
/// A batch size of 1 writes every record as it arrives. A failed flush drops
/// the batch; the caller logs it and the session continues.
pub struct BatchingSink<S: RecordSink> {
    sink: Arc<Mutex<S>>,
    buffer: Vec<ExtractedRecord>,
    batch_size: usize,
    saved: u64,
    failed: u64,
}

impl<S: RecordSink> BatchingSink<S> {
    pub fn new(sink: Arc<Mutex<S>>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            saved: 0,
            failed: 0,
        }
    }

    /// Queues a record, flushing once the buffer is full
    ///
    /// # Returns
    ///
    /// The number of records written by this call
    pub fn push(&mut self, record: ExtractedRecord) -> StorageResult<usize> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()
        } else {
            Ok(0)
        }
    }

    /// Writes everything buffered
    pub fn flush(&mut self) -> StorageResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.buffer);

        let result = {
            let mut sink = self.sink.lock();
            match batch.as_slice() {
                [single] => sink.upsert(single).map(|()| 1),
                records => sink.upsert_batch(records),
            }
        };

        match result {
            Ok(written) => {
                self.saved += written as u64;
                Ok(written)
            }
            Err(e) => {
                self.failed += batch.len() as u64;
                Err(e)
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Records written so far
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Records lost to failed flushes
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn sink(&self) -> &Arc<Mutex<S>> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{CoreListing, SiteDetail, SyarahDetail};
    use crate::storage::{SqliteStorage, StorageError};
    use chrono::Utc;
    use std::collections::HashSet;

    fn record(ad_id: &str) -> ExtractedRecord {
        ExtractedRecord {
            core: CoreListing::new(ad_id, "https://syarah.com/en/car", "Syarah", Utc::now()),
            detail: SiteDetail::Syarah(SyarahDetail::default()),
        }
    }

    fn storage() -> Arc<Mutex<SqliteStorage>> {
        Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
    }

    #[test]
    fn test_unbatched_writes_immediately() {
        let mut sink = BatchingSink::new(storage(), 1);
        assert_eq!(sink.push(record("1")).unwrap(), 1);
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.sink().lock().count_listings(None).unwrap(), 1);
    }

    #[test]
    fn test_flushes_on_size_and_on_demand() {
        let mut sink = BatchingSink::new(storage(), 3);
        assert_eq!(sink.push(record("1")).unwrap(), 0);
        assert_eq!(sink.push(record("2")).unwrap(), 0);
        assert_eq!(sink.push(record("3")).unwrap(), 3);
        assert_eq!(sink.push(record("4")).unwrap(), 0);
        assert_eq!(sink.pending(), 1);

        assert_eq!(sink.flush().unwrap(), 1);
        assert_eq!(sink.flush().unwrap(), 0);
        assert_eq!(sink.saved(), 4);
        assert_eq!(sink.sink().lock().count_listings(Some("Syarah")).unwrap(), 4);
    }

    struct BrokenSink;

    impl RecordSink for BrokenSink {
        fn upsert(&mut self, _record: &ExtractedRecord) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn upsert_batch(&mut self, _records: &[ExtractedRecord]) -> StorageResult<usize> {
            Err(StorageError::Database("disk full".to_string()))
        }
        fn seen_ids(&self, _website: &str) -> StorageResult<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn get_listing(&self, _ad_id: &str) -> StorageResult<Option<CoreListing>> {
            Ok(None)
        }
        fn count_listings(&self, _website: Option<&str>) -> StorageResult<u64> {
            Ok(0)
        }
        fn listings_by_website(&self) -> StorageResult<Vec<(String, u64)>> {
            Ok(Vec::new())
        }
        fn count_details(&self, _website: &str) -> StorageResult<u64> {
            Ok(0)
        }
        fn create_run(&mut self, _hash: &str, _website: &str, _mode: &str) -> StorageResult<i64> {
            Ok(1)
        }
        fn finish_run(
            &mut self,
            _run_id: i64,
            _status: crate::storage::RunStatus,
            _stop_reason: Option<&str>,
            _records_saved: u64,
        ) -> StorageResult<()> {
            Ok(())
        }
        fn get_run(&self, run_id: i64) -> StorageResult<crate::storage::RunRecord> {
            Err(StorageError::RunNotFound(run_id))
        }
        fn get_latest_run(&self) -> StorageResult<Option<crate::storage::RunRecord>> {
            Ok(None)
        }
    }

    #[test]
    fn test_failed_flush_is_counted_and_cleared() {
        let mut sink = BatchingSink::new(Arc::new(Mutex::new(BrokenSink)), 2);
        sink.push(record("1")).unwrap();
        assert!(sink.push(record("2")).is_err());
        assert_eq!(sink.failed(), 2);
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.saved(), 0);
    }
}
