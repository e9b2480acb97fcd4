//! Per-key append-only logs with committed offsets.

use std::collections::HashMap;

/// One key's log. Offsets start at 0 and are contiguous.
#[derive(Debug, Default)]
pub struct PartitionLog {
    entries: Vec<(u64, i64)>,
    committed: u64,
}

impl PartitionLog {
    pub fn append(&mut self, message: i64) -> u64 {
        let offset = self.entries.len() as u64;
        self.entries.push((offset, message));
        offset
    }

    /// Up to `limit` entries starting at the first offset `>= from`.
    pub fn read_from(&self, from: u64, limit: usize) -> &[(u64, i64)] {
        let start = self.entries.partition_point(|(offset, _)| *offset < from);
        let end = self.entries.len().min(start.saturating_add(limit));
        &self.entries[start..end]
    }

    /// Committed offsets only move forward.
    pub fn commit(&mut self, offset: u64) {
        self.committed = self.committed.max(offset);
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }
}

#[derive(Debug, Default)]
pub struct LogStore {
    logs: HashMap<String, PartitionLog>,
}

impl LogStore {
    pub fn send(&mut self, key: &str, message: i64) -> u64 {
        self.logs.entry(key.to_string()).or_default().append(message)
    }

    /// Entries for each key at or past its requested offset. Keys with
    /// nothing to return are left out.
    pub fn poll(
        &self,
        offsets: &HashMap<String, u64>,
        limit: usize,
    ) -> HashMap<String, Vec<(u64, i64)>> {
        offsets
            .iter()
            .filter_map(|(key, from)| {
                let entries = self.logs.get(key)?.read_from(*from, limit);
                (!entries.is_empty()).then(|| (key.clone(), entries.to_vec()))
            })
            .collect()
    }

    pub fn commit(&mut self, offsets: &HashMap<String, u64>) {
        for (key, offset) in offsets {
            self.logs.entry(key.clone()).or_default().commit(*offset);
        }
    }

    /// Committed offset per key; keys never seen report 0.
    pub fn committed(&self, keys: &[String]) -> HashMap<String, u64> {
        keys.iter()
            .map(|key| {
                let offset = self.logs.get(key).map_or(0, PartitionLog::committed);
                (key.clone(), offset)
            })
            .collect()
    }
}
