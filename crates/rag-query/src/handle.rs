//! Reloadable retriever handle.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{info, warn};

use rag_core::{GenerationStore, RagError, Result, RetrieverConfig, SearchResults};

use crate::retriever::{Capabilities, HybridRetriever};

/// Lifecycle of a [`RetrieverHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverState {
    /// Nothing loaded yet.
    Uninitialized,
    /// A generation is being served.
    Ready,
    /// The first load failed; searches retry the load.
    Failed,
}

/// Summary of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    pub chunks: usize,
}

/// Owns the active [`HybridRetriever`] and swaps it atomically on reload.
///
/// Searches take a reference-counted snapshot of the active retriever and use
/// it until they finish, so a reload never blocks or disturbs them. Reloads
/// are serialized by a lock and build the new retriever before swapping; a
/// failed reload leaves the previous generation in place.
pub struct RetrieverHandle {
    store: Arc<dyn GenerationStore>,
    capabilities: Capabilities,
    config: RetrieverConfig,
    active: ArcSwapOption<HybridRetriever>,
    reload_lock: Mutex<()>,
    failed: AtomicBool,
}

impl RetrieverHandle {
    /// Create an unloaded handle.
    pub fn new(
        store: Arc<dyn GenerationStore>,
        capabilities: Capabilities,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            capabilities,
            config,
            active: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            failed: AtomicBool::new(false),
        }
    }

    /// Create a handle and load the published generation.
    pub async fn open(
        store: Arc<dyn GenerationStore>,
        capabilities: Capabilities,
        config: RetrieverConfig,
    ) -> Result<Self> {
        let handle = Self::new(store, capabilities, config);
        handle.reload().await?;
        Ok(handle)
    }

    pub fn state(&self) -> RetrieverState {
        if self.active.load().is_some() {
            RetrieverState::Ready
        } else if self.failed.load(Ordering::Acquire) {
            RetrieverState::Failed
        } else {
            RetrieverState::Uninitialized
        }
    }

    /// Snapshot of the active retriever, if any.
    pub fn current(&self) -> Option<Arc<HybridRetriever>> {
        self.active.load_full()
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Load the published generation and make it active.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        self.swap_in().await
    }

    /// Build from the store and swap. Caller holds `reload_lock`.
    async fn swap_in(&self) -> Result<ReloadReport> {
        info!("Reloading retriever from {}", self.store.location());

        match self.build().await {
            Ok(retriever) => {
                let chunks = retriever.len();
                self.active.store(Some(Arc::new(retriever)));
                self.failed.store(false, Ordering::Release);
                info!("Retriever swapped: {} chunks", chunks);
                Ok(ReloadReport { chunks })
            }
            Err(e) => {
                if self.active.load().is_none() {
                    self.failed.store(true, Ordering::Release);
                }
                warn!("Reload failed, keeping previous state: {}", e);
                Err(e)
            }
        }
    }

    async fn build(&self) -> Result<HybridRetriever> {
        let generation = self.store.load().await?;
        let capabilities = self.capabilities.clone();
        let config = self.config;

        tokio::task::spawn_blocking(move || HybridRetriever::new(generation, &capabilities, config))
            .await
            .map_err(|e| RagError::internal(format!("Index build task failed: {}", e)))?
    }

    /// Search the active generation, loading it first if needed.
    pub async fn search(&self, query: &str, topk: NonZeroUsize) -> Result<SearchResults> {
        let retriever = match self.current() {
            Some(retriever) => retriever,
            None => self.ensure_loaded().await?,
        };

        retriever.search(query, topk).await
    }

    /// Load on first use. Searches queued behind the lock reuse the result.
    async fn ensure_loaded(&self) -> Result<Arc<HybridRetriever>> {
        let _guard = self.reload_lock.lock().await;
        if let Some(retriever) = self.current() {
            return Ok(retriever);
        }

        self.swap_in().await?;
        self.current()
            .ok_or_else(|| RagError::internal("retriever missing after load"))
    }

    /// Search with the configured default result count.
    pub async fn search_default(&self, query: &str) -> Result<SearchResults> {
        self.search(query, self.config.default_top_k()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::retriever::tests::{generation, FixedEmbedder, WhitespaceTokenizer};
    use rag_core::{Generation, GenerationInfo, SearchConfig};

    /// In-memory store whose generation can be replaced or removed.
    struct MemoryStore {
        generation: StdMutex<Option<Generation>>,
        loads: AtomicUsize,
    }

    impl MemoryStore {
        fn new(generation: Option<Generation>) -> Self {
            Self {
                generation: StdMutex::new(generation),
                loads: AtomicUsize::new(0),
            }
        }

        fn replace(&self, generation: Option<Generation>) {
            *self.generation.lock().unwrap() = generation;
        }
    }

    #[async_trait]
    impl GenerationStore for MemoryStore {
        async fn load(&self) -> Result<Generation> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.generation
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| RagError::IndexMissing {
                    path: "memory".into(),
                })
        }

        async fn publish(&self, generation: Generation) -> Result<GenerationInfo> {
            let info = GenerationInfo {
                chunks: generation.len() as u64,
                documents: generation.document_count() as u64,
                dimension: generation.dimension,
                published_at: 0,
            };
            self.replace(Some(generation));
            Ok(info)
        }

        async fn info(&self) -> Result<Option<GenerationInfo>> {
            Ok(None)
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    fn old_corpus() -> Generation {
        generation(&["old one", "old two"], &[[1.0, 0.0], [0.0, 1.0]])
    }

    fn new_corpus() -> Generation {
        generation(
            &["new one", "new two", "new three"],
            &[[1.0, 0.0], [0.0, 1.0], [0.6, 0.8]],
        )
    }

    fn capabilities(delay: Duration) -> Capabilities {
        Capabilities {
            embedder: Arc::new(FixedEmbedder {
                query: vec![1.0, 0.0],
                delay,
            }),
            tokenizer: Arc::new(WhitespaceTokenizer),
            scorer: None,
        }
    }

    fn config() -> RetrieverConfig {
        SearchConfig::default().validate().unwrap()
    }

    fn topk(k: usize) -> NonZeroUsize {
        NonZeroUsize::new(k).unwrap()
    }

    #[tokio::test]
    async fn test_lazy_first_load() {
        let store = Arc::new(MemoryStore::new(Some(old_corpus())));
        let handle = RetrieverHandle::new(store, capabilities(Duration::ZERO), config());
        assert_eq!(handle.state(), RetrieverState::Uninitialized);

        let results = handle.search("old", topk(5)).await.unwrap();
        assert_eq!(results.total_results, 2);
        assert_eq!(handle.state(), RetrieverState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_first_searches_load_once() {
        let store = Arc::new(MemoryStore::new(Some(old_corpus())));
        let handle = RetrieverHandle::new(store.clone(), capabilities(Duration::ZERO), config());

        let (a, b, c, d) = tokio::join!(
            handle.search("old", topk(2)),
            handle.search("one", topk(2)),
            handle.search("two", topk(2)),
            handle.search_default("old two"),
        );
        for results in [a, b, c, d] {
            assert_eq!(results.unwrap().total_results, 2);
        }

        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), RetrieverState::Ready);
    }

    #[tokio::test]
    async fn test_failed_load_then_retry() {
        let store = Arc::new(MemoryStore::new(None));
        let handle =
            RetrieverHandle::new(store.clone(), capabilities(Duration::ZERO), config());

        let err = handle.reload().await.unwrap_err();
        assert_eq!(err.error_code(), "INDEX_MISSING");
        assert_eq!(handle.state(), RetrieverState::Failed);
        assert!(handle.search("old", topk(1)).await.is_err());

        store.replace(Some(old_corpus()));
        assert_eq!(handle.reload().await.unwrap().chunks, 2);
        assert_eq!(handle.state(), RetrieverState::Ready);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_generation() {
        let store = Arc::new(MemoryStore::new(Some(old_corpus())));
        let handle =
            RetrieverHandle::open(store.clone(), capabilities(Duration::ZERO), config())
                .await
                .unwrap();

        let mut broken = new_corpus();
        broken.tokens.pop();
        store.replace(Some(broken));

        let err = handle.reload().await.unwrap_err();
        assert_eq!(err.error_code(), "CORPUS_INCONSISTENT");
        assert_eq!(handle.state(), RetrieverState::Ready);

        let results = handle.search("old", topk(5)).await.unwrap();
        assert!(results.results.iter().all(|h| h.text.starts_with("old")));
    }

    #[tokio::test]
    async fn test_in_flight_search_keeps_old_snapshot() {
        let store = Arc::new(MemoryStore::new(Some(old_corpus())));
        let handle = Arc::new(
            RetrieverHandle::open(
                store.clone(),
                capabilities(Duration::from_millis(200)),
                config(),
            )
            .await
            .unwrap(),
        );

        let in_flight = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.search("one two", topk(10)).await })
        };

        // Let the search take its snapshot, then swap underneath it
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.replace(Some(new_corpus()));
        assert_eq!(handle.reload().await.unwrap().chunks, 3);

        let old = in_flight.await.unwrap().unwrap();
        assert_eq!(old.total_results, 2);
        assert!(old.results.iter().all(|h| h.text.starts_with("old")));

        let new = handle.search("one two", topk(10)).await.unwrap();
        assert_eq!(new.total_results, 3);
        assert!(new.results.iter().all(|h| h.text.starts_with("new")));
    }

    #[tokio::test]
    async fn test_snapshot_outlives_swap() {
        let store = Arc::new(MemoryStore::new(Some(old_corpus())));
        let handle =
            RetrieverHandle::open(store.clone(), capabilities(Duration::ZERO), config())
                .await
                .unwrap();

        let snapshot = handle.current().unwrap();
        store.replace(Some(new_corpus()));
        handle.reload().await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(handle.current().unwrap().len(), 3);
    }
}
