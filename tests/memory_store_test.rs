//! 持久化记忆集成测试：落盘、重开、容量淘汰与失败时的一致性

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use drone::core::MemoryError;
use drone::llm::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
use drone::memory::{EmbeddingMatrix, MemoryEntry, MemoryStore, StoreOptions, StorePersistence};
use tempfile::TempDir;

/// 维度可切换、遇到 "fail" 报错的嵌入
struct FlakyEmbedder {
    dim: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(dim: usize) -> Self {
        Self {
            dim: AtomicUsize::new(dim),
        }
    }
}

impl EmbeddingProvider for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains("fail") {
            return Err(EmbeddingError::Backend("rate limited".into()));
        }
        let dim = self.dim.load(Ordering::SeqCst);
        let mut v = vec![0.0; dim];
        v[text.len() % dim] = 1.0;
        Ok(v)
    }
}

fn hashing() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::new(64))
}

#[test]
fn test_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auto-gpt.json");
    {
        let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
        assert!(store.is_empty());
        store
            .add("Wrote the outline for the bee essay", ["action"], Some("a1".into()))
            .unwrap();
        store
            .add("Searched for pollination statistics", ["search"], Some("a2".into()))
            .unwrap();
        store.add("Saved notes to notes.txt", ["action"], None).unwrap();
    }

    let store = MemoryStore::open(&path, hashing(), StoreOptions::default());
    assert_eq!(store.len(), 3);
    assert_eq!(store.stats().shape, (3, 64));
    assert_eq!(store.entries()[0].id, "a1");
    assert!(store.entries()[0].tags.contains("in-progress"));
    assert!(store.entries()[1].tags.contains("search"));

    let best = store.get("pollination statistics").unwrap().unwrap();
    assert_eq!(best.id, "a2");
}

#[test]
fn test_dedup_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    let first = {
        let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
        store.add("same content", ["action"], None).unwrap().unwrap()
    };
    let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
    let again = store.add("same content", ["other"], None).unwrap().unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_failed_embedding_leaves_store_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    let embedder = Arc::new(FlakyEmbedder::new(4));
    let mut store = MemoryStore::open(&path, embedder.clone(), StoreOptions::default());
    store.add("first note", ["action"], None).unwrap();

    let err = store.add("this will fail", ["action"], None).unwrap_err();
    assert!(matches!(err, MemoryError::Embedding(_)));
    assert_eq!(store.len(), 1);
    assert_eq!(store.embedding_rows(), 1);

    embedder.dim.store(8, Ordering::SeqCst);
    let err = store.add("different width", ["action"], None).unwrap_err();
    assert!(matches!(
        err,
        MemoryError::DimensionMismatch {
            expected: 4,
            actual: 8
        }
    ));
    assert_eq!(store.stats().shape, (1, 4));

    let reopened = MemoryStore::open(&path, Arc::new(FlakyEmbedder::new(4)), StoreOptions::default());
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_count_cap_keeps_newest() {
    let mut store = MemoryStore::in_memory(
        hashing(),
        StoreOptions {
            max_entries: 5,
            save_on_every_action: false,
            ..StoreOptions::default()
        },
    );
    for i in 0..8 {
        store.add(&format!("note {}", i), ["action"], None).unwrap();
    }
    assert_eq!(store.len(), 5);
    assert_eq!(store.embedding_rows(), 5);
    assert_eq!(store.entries()[0].content, "note 3");
    assert_eq!(store.entries()[4].content, "note 7");
}

#[test]
fn test_byte_cap_evicts_oldest_in_batches() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    let opts = StoreOptions {
        max_file_bytes: 6_000,
        eviction_batch: 4,
        ..StoreOptions::default()
    };
    let mut store = MemoryStore::open(&path, Arc::new(HashingEmbedder::new(8)), opts.clone());
    for i in 0..40 {
        store
            .add(&format!("observation {} {}", i, "x".repeat(200)), ["action"], None)
            .unwrap();
    }

    let size = std::fs::metadata(&path).unwrap().len() as usize;
    assert!(size <= 6_000, "file is {} bytes", size);
    assert!(store.len() < 40);
    assert_eq!(store.len(), store.embedding_rows());
    assert!(store.entries().last().unwrap().content.starts_with("observation 39 "));
    assert!(!store.entries()[0].content.starts_with("observation 0 "));

    let reopened = MemoryStore::open(&path, Arc::new(HashingEmbedder::new(8)), opts);
    assert_eq!(reopened.len(), store.len());
}

#[test]
fn test_save_evicts_at_most_one_extra_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    let cap = 5_000;
    let batch = 3;
    let embedder = Arc::new(HashingEmbedder::new(8));
    let mut store = MemoryStore::open(
        &path,
        embedder.clone(),
        StoreOptions {
            max_file_bytes: cap,
            eviction_batch: batch,
            save_on_every_action: false,
            ..StoreOptions::default()
        },
    );
    for i in 0..30 {
        store
            .add(&format!("observation {} {}", i, "y".repeat(150)), ["action"], None)
            .unwrap();
    }
    let before: Vec<MemoryEntry> = store.entries().to_vec();
    assert!(store.serialized_size().unwrap() > cap);

    store.save().unwrap();

    // 与 save 相同的编码：保留 before[from..]
    let encoded_len = |from: usize| {
        let rows = before[from..]
            .iter()
            .map(|e| embedder.embed(&e.content).unwrap())
            .collect();
        let matrix = EmbeddingMatrix::from_rows(rows).unwrap();
        StorePersistence::encode(&before[from..], &matrix).unwrap().len()
    };
    let removed = before.len() - store.len();
    assert!(removed > 0);
    assert_eq!(removed % batch, 0);
    assert_eq!(store.entries()[0].id, before[removed].id);
    assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, encoded_len(removed));
    assert!(encoded_len(removed) <= cap);
    // 少淘汰一批仍然超限
    assert!(encoded_len(removed - batch) > cap);
    // 多淘汰的条目不足一批
    let needed = (0..before.len()).find(|&k| encoded_len(k) <= cap).unwrap();
    assert!(removed - needed < batch);
}

#[test]
fn test_mark_done_on_in_progress_tag() {
    let mut store = MemoryStore::in_memory(
        hashing(),
        StoreOptions {
            save_on_every_action: false,
            ..StoreOptions::default()
        },
    );
    store.add("Opened the project notes", ["action"], None).unwrap();
    store.add("Listed the workspace files", ["action"], None).unwrap();
    store.add("Read the config file", ["action"], None).unwrap();
    let pending = store
        .add("Drafting the summary section", ["action", "in-progress"], None)
        .unwrap()
        .unwrap();

    assert_eq!(store.mark_done(&["in-progress"]).unwrap(), 1);

    let done = store.entries().iter().find(|e| e.id == pending.id).unwrap();
    let tags: Vec<&str> = done.tags.iter().map(String::as_str).collect();
    assert_eq!(tags, vec!["action", "done"]);
    for e in &store.entries()[..3] {
        let tags: Vec<&str> = e.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["action"]);
    }
}

#[test]
fn test_mark_done_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    {
        let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
        store
            .add("Started section one", ["action", "in-progress"], Some("s1".into()))
            .unwrap();
        store
            .add("Collected sources", ["research", "in-progress"], Some("s2".into()))
            .unwrap();
        store.add("Unrelated", ["misc"], Some("s3".into())).unwrap();

        let matched = store.mark_done(&["action"]).unwrap();
        assert_eq!(matched, 1);
    }

    let store = MemoryStore::open(&path, hashing(), StoreOptions::default());
    let s1 = &store.entries()[0];
    assert!(s1.tags.contains("done"));
    assert!(s1.tags.contains("action"));
    assert!(!s1.tags.contains("in-progress"));
    assert!(store.entries()[1].tags.contains("in-progress"));
    assert_eq!(store.search(&["done"]).len(), 1);
}

#[test]
fn test_relevance_backfills_to_k() {
    let mut store = MemoryStore::in_memory(
        hashing(),
        StoreOptions {
            save_on_every_action: false,
            ..StoreOptions::default()
        },
    );
    for text in ["apples and pears", "rust borrow checker", "tidal patterns", "jazz chords"] {
        store.add(text, ["action"], None).unwrap();
    }
    let hits = store.get_relevant("rust borrow checker rules", 3).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].content, "rust borrow checker");
    assert_eq!(store.get_relevant("anything", 10).unwrap().len(), 4);
}

#[test]
fn test_corrupt_file_starts_empty_and_is_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    std::fs::write(&path, "{not json").unwrap();

    let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
    assert!(store.is_empty());
    store.add("fresh start", ["action"], None).unwrap();

    let reopened = MemoryStore::open(&path, hashing(), StoreOptions::default());
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.entries()[0].content, "fresh start");
}

#[test]
fn test_clear_persists_empty_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem.json");
    let mut store = MemoryStore::open(&path, hashing(), StoreOptions::default());
    store.add("to be forgotten", ["action"], None).unwrap();
    assert_eq!(store.clear(), "Memory cleared.");

    let reopened = MemoryStore::open(&path, hashing(), StoreOptions::default());
    assert!(reopened.is_empty());
    assert_eq!(reopened.stats().entry_count, 0);
}
