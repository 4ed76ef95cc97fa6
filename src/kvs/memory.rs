//! In-process KVS engine.
//!
//! One mutex-guarded keyspace of typed entries. Every trait method takes the
//! lock once, so each command observes and produces a consistent state:
//! the same per-command atomicity the cluster deployment gets from its
//! shared store. This engine is the reference backend for tests and
//! single-node runs.

use super::{FieldMap, Kvs, KvsError, KvsResult, ScanPage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Backend builder registered under the `mem` scheme.
pub fn open(_uri: &str) -> KvsResult<Arc<dyn Kvs>> {
    Ok(Arc::new(MemoryKvs::new()))
}

#[derive(Debug)]
enum Entry {
    Str(String),
    Hash(FieldMap),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

/// Shared in-process keyspace.
#[derive(Debug, Default)]
pub struct MemoryKvs {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvs {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str) -> KvsError {
        KvsError::WrongType {
            key: key.to_owned(),
        }
    }
}

/// Fetch the typed entry for `key`, creating it with `make` when absent.
/// Fails with `WrongType` when the key holds a different kind.
macro_rules! typed_entry {
    ($guard:expr, $key:expr, $variant:path, $make:expr) => {
        match $guard
            .entry($key.to_owned())
            .or_insert_with(|| $variant($make))
        {
            $variant(inner) => Ok(inner),
            _ => Err(MemoryKvs::wrong_type($key)),
        }
    };
}

#[async_trait]
impl Kvs for MemoryKvs {
    async fn get(&self, key: &str) -> KvsResult<Option<String>> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvsResult<()> {
        self.entries
            .lock()
            .insert(key.to_owned(), Entry::Str(value.to_owned()));
        Ok(())
    }

    async fn del(&self, key: &str) -> KvsResult<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> KvsResult<Option<Vec<u8>>> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> KvsResult<bool> {
        let mut guard = self.entries.lock();
        let map = typed_entry!(guard, key, Entry::Hash, FieldMap::new())?;
        Ok(map.insert(field.to_owned(), value.to_vec()).is_none())
    }

    async fn hmset(&self, key: &str, entries: FieldMap) -> KvsResult<()> {
        let mut guard = self.entries.lock();
        let map = typed_entry!(guard, key, Entry::Hash, FieldMap::new())?;
        map.extend(entries);
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> KvsResult<bool> {
        let mut guard = self.entries.lock();
        let Some(entry) = guard.get_mut(key) else {
            return Ok(false);
        };
        let Entry::Hash(map) = entry else {
            return Err(Self::wrong_type(key));
        };
        let removed = map.remove(field).is_some();
        if map.is_empty() {
            guard.remove(key);
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> KvsResult<FieldMap> {
        match self.entries.lock().get(key) {
            None => Ok(FieldMap::new()),
            Some(Entry::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> KvsResult<Vec<Option<Vec<u8>>>> {
        let guard = self.entries.lock();
        match guard.get(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Entry::Hash(map)) => Ok(fields
                .iter()
                .map(|field| map.get(*field).cloned())
                .collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvsResult<i64> {
        let mut guard = self.entries.lock();
        let map = typed_entry!(guard, key, Entry::Hash, FieldMap::new())?;
        let current = match map.get(field) {
            None => 0,
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| KvsError::NotAnInteger {
                    key: key.to_owned(),
                })?,
        };
        let next = current + delta;
        map.insert(field.to_owned(), next.to_string().into_bytes());
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut guard = self.entries.lock();
        let set = typed_entry!(guard, key, Entry::Set, BTreeSet::new())?;
        Ok(set.insert(member.to_owned()))
    }

    async fn srem(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut guard = self.entries.lock();
        let Some(entry) = guard.get_mut(key) else {
            return Ok(false);
        };
        let Entry::Set(set) = entry else {
            return Err(Self::wrong_type(key));
        };
        let removed = set.remove(member);
        if set.is_empty() {
            guard.remove(key);
        }
        Ok(removed)
    }

    async fn sscan(&self, key: &str, cursor: u64, count: u64) -> KvsResult<ScanPage> {
        let guard = self.entries.lock();
        let set = match guard.get(key) {
            None => return Ok(ScanPage::default()),
            Some(Entry::Set(set)) => set,
            Some(_) => return Err(Self::wrong_type(key)),
        };
        // The cursor is an offset into the ordered member sequence. Like any
        // cursor scan over a live set, members added or removed mid-scan may
        // be missed or repeated; a full pass over a stable set is exact.
        let members: Vec<String> = set
            .iter()
            .skip(cursor as usize)
            .take(count.max(1) as usize)
            .cloned()
            .collect();
        let consumed = cursor as usize + members.len();
        let next = if consumed >= set.len() {
            0
        } else {
            consumed as u64
        };
        Ok(ScanPage {
            cursor: next,
            members,
        })
    }

    async fn rpush(&self, key: &str, value: &str) -> KvsResult<u64> {
        let mut guard = self.entries.lock();
        let list = typed_entry!(guard, key, Entry::List, VecDeque::new())?;
        list.push_back(value.to_owned());
        Ok(list.len() as u64)
    }

    async fn lpop(&self, key: &str) -> KvsResult<Option<String>> {
        let mut guard = self.entries.lock();
        let Some(entry) = guard.get_mut(key) else {
            return Ok(None);
        };
        let Entry::List(list) = entry else {
            return Err(Self::wrong_type(key));
        };
        let head = list.pop_front();
        if list.is_empty() {
            guard.remove(key);
        }
        Ok(head)
    }

    async fn lrem_all(&self, key: &str, value: &str) -> KvsResult<u64> {
        let mut guard = self.entries.lock();
        let Some(entry) = guard.get_mut(key) else {
            return Ok(0);
        };
        let Entry::List(list) = entry else {
            return Err(Self::wrong_type(key));
        };
        let before = list.len();
        list.retain(|item| item != value);
        let removed = (before - list.len()) as u64;
        if list.is_empty() {
            guard.remove(key);
        }
        Ok(removed)
    }

    async fn lrange_all(&self, key: &str) -> KvsResult<Vec<String>> {
        match self.entries.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn check_del(&self, key: &str, expected: &str) -> KvsResult<bool> {
        let mut guard = self.entries.lock();
        let matches = matches!(guard.get(key), Some(Entry::Str(value)) if value == expected);
        if matches {
            guard.remove(key);
        }
        Ok(matches)
    }

    async fn incr_limit(&self, key: &str, limit: u64) -> KvsResult<u64> {
        let mut guard = self.entries.lock();
        let current = match guard.get(key) {
            None => 0,
            Some(Entry::Str(value)) => {
                value
                    .parse::<u64>()
                    .map_err(|_| KvsError::NotAnInteger {
                        key: key.to_owned(),
                    })?
            }
            Some(_) => return Err(Self::wrong_type(key)),
        };
        let mut next = current + 1;
        if next > limit {
            next = 1;
        }
        guard.insert(key.to_owned(), Entry::Str(next.to_string()));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_del_requires_exact_value() {
        let kvs = MemoryKvs::new();
        kvs.set("k", "node-a").await.unwrap();
        assert!(!kvs.check_del("k", "node-b").await.unwrap());
        assert_eq!(kvs.get("k").await.unwrap().as_deref(), Some("node-a"));
        assert!(kvs.check_del("k", "node-a").await.unwrap());
        assert_eq!(kvs.get("k").await.unwrap(), None);
        assert!(!kvs.check_del("k", "node-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_limit_wraps_past_limit() {
        let kvs = MemoryKvs::new();
        assert_eq!(kvs.incr_limit("pid", 3).await.unwrap(), 1);
        assert_eq!(kvs.incr_limit("pid", 3).await.unwrap(), 2);
        assert_eq!(kvs.incr_limit("pid", 3).await.unwrap(), 3);
        assert_eq!(kvs.incr_limit("pid", 3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hincrby_creates_and_accumulates() {
        let kvs = MemoryKvs::new();
        assert_eq!(kvs.hincrby("h", "a", 1).await.unwrap(), 1);
        assert_eq!(kvs.hincrby("h", "a", 1).await.unwrap(), 2);
        assert_eq!(kvs.hincrby("h", "a", -2).await.unwrap(), 0);
        assert_eq!(kvs.hincrby("h", "a", -1).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_hmget_positional_results() {
        let kvs = MemoryKvs::new();
        kvs.hset("h", "x", b"1").await.unwrap();
        let got = kvs.hmget("h", &["missing", "x"]).await.unwrap();
        assert_eq!(got, vec![None, Some(b"1".to_vec())]);
    }

    #[tokio::test]
    async fn test_sscan_pages_through_whole_set() {
        let kvs = MemoryKvs::new();
        for i in 0..10 {
            kvs.sadd("s", &format!("m{i:02}")).await.unwrap();
        }
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let page = kvs.sscan("s", cursor, 3).await.unwrap();
            seen.extend(page.members);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn test_list_ops_preserve_fifo_order() {
        let kvs = MemoryKvs::new();
        for id in ["1", "2", "1", "3"] {
            kvs.rpush("l", id).await.unwrap();
        }
        assert_eq!(kvs.lrem_all("l", "1").await.unwrap(), 2);
        assert_eq!(kvs.lrange_all("l").await.unwrap(), vec!["2", "3"]);
        assert_eq!(kvs.lpop("l").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kvs.lpop("l").await.unwrap().as_deref(), Some("3"));
        assert_eq!(kvs.lpop("l").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let kvs = MemoryKvs::new();
        kvs.set("k", "v").await.unwrap();
        assert!(matches!(
            kvs.hget("k", "f").await,
            Err(KvsError::WrongType { .. })
        ));
        assert!(matches!(
            kvs.rpush("k", "v").await,
            Err(KvsError::WrongType { .. })
        ));
    }
}
