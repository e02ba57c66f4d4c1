//! The explorer context: catalog, store and caches behind the caller-facing operations.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ExplorerConfig;
use crate::documents::{DocumentHandle, DocumentResolver, FsDocumentResolver};
use crate::error::{ExplorerError, Result};
use crate::export::TabularResult;
use crate::model::types::{DatasetOverview, SearchResult};
use crate::search::adhoc::AdHocExecutor;
use crate::search::cache::{CacheStats, QuerySignature, ResultCache};
use crate::search::catalog::{FactKind, SchemaCatalog};
use crate::search::query::{SearchClient, SearchFilters};
use crate::search::validator::{QueryValidator, ValidatedQuery};
use crate::storage::sqlite::{self, BpsStore};

/// Counters for each of the explorer's caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExplorerCacheStats {
    pub search: CacheStats,
    pub tables: CacheStats,
    pub overview: CacheStats,
}

/// Entry point for every read against the BPS database.
///
/// Safe to share across threads: each call opens its own read-only
/// connection, and the caches are the only shared mutable state.
#[derive(Debug)]
pub struct Explorer {
    config: ExplorerConfig,
    catalog: SchemaCatalog,
    store: BpsStore,
    search_cache: ResultCache<QuerySignature, Arc<Vec<SearchResult>>>,
    table_cache: ResultCache<QuerySignature, Arc<TabularResult>>,
    overview_cache: ResultCache<QuerySignature, Arc<DatasetOverview>>,
}

impl Explorer {
    pub fn new(config: ExplorerConfig) -> Self {
        Self::with_catalog(config, SchemaCatalog::bps())
    }

    pub fn with_catalog(config: ExplorerConfig, catalog: SchemaCatalog) -> Self {
        let (capacity, ttl) = (config.cache_capacity, config.cache_ttl);
        Self {
            store: BpsStore::new(&config.db_path),
            search_cache: ResultCache::new(capacity, ttl),
            table_cache: ResultCache::new(capacity, ttl),
            overview_cache: ResultCache::new(capacity, ttl),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &BpsStore {
        &self.store
    }

    /// Open a connection once to confirm the store is reachable.
    pub fn check(&self) -> Result<()> {
        self.store.connect("check").map(drop)
    }

    /// Models whose searchable columns contain `term`, case-insensitively.
    pub fn search(&self, term: &str) -> Result<Arc<Vec<SearchResult>>> {
        self.search_filtered(term, &SearchFilters::default())
    }

    /// [`search`](Self::search) narrowed by `filters`.
    pub fn search_filtered(
        &self,
        term: &str,
        filters: &SearchFilters,
    ) -> Result<Arc<Vec<SearchResult>>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ExplorerError::EmptySearchTerm);
        }
        self.run_search(Some(term), filters)
    }

    /// Every model passing `filters`; no term involved.
    pub fn list_models(&self, filters: &SearchFilters) -> Result<Arc<Vec<SearchResult>>> {
        self.run_search(None, filters)
    }

    fn run_search(
        &self,
        term: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Arc<Vec<SearchResult>>> {
        let signature = QuerySignature::search(term, filters);
        self.search_cache.get_or_compute(&signature, || {
            let conn = self.store.connect("search")?;
            SearchClient::new(&conn, &self.catalog)
                .search(term, filters)
                .map(Arc::new)
                .map_err(|e| ExplorerError::unavailable(self.store.path(), "search", e))
        })
    }

    /// Apply the read-only policy to `raw` without running it.
    pub fn validate(&self, raw: &str) -> Result<ValidatedQuery> {
        QueryValidator::new(&self.catalog)
            .validate(raw)
            .map_err(|reason| {
                warn!(reason = %reason, "ad-hoc query rejected");
                ExplorerError::ValidationRejected(reason)
            })
    }

    /// Validate and run caller-supplied SQL under the configured time and row bounds.
    pub fn run_ad_hoc_query(&self, raw: &str) -> Result<Arc<TabularResult>> {
        let query = self.validate(raw)?;
        let signature = QuerySignature::ad_hoc(&query);
        self.table_cache.get_or_compute(&signature, || {
            let conn = self.store.connect("ad-hoc query")?;
            AdHocExecutor::new(&conn, self.store.path(), self.config.query_timeout)
                .with_max_rows(self.config.max_rows)
                .execute(&query)
                .map(Arc::new)
        })
    }

    /// Rows of one per-model fact table.
    pub fn model_facts(&self, kind: FactKind, model_id: &str) -> Result<Arc<TabularResult>> {
        let model_id = model_id.trim();
        let signature = QuerySignature::facts(kind, model_id);
        self.table_cache.get_or_compute(&signature, || {
            let conn = self.store.connect("model facts")?;
            let unavailable =
                |e: rusqlite::Error| ExplorerError::unavailable(self.store.path(), "model facts", e);
            if !sqlite::model_exists(&conn, model_id).map_err(unavailable)? {
                return Err(ExplorerError::ModelNotFound(model_id.to_string()));
            }
            let table = sqlite::fetch_facts(&conn, &self.catalog, kind, model_id)
                .map_err(unavailable)?
                .unwrap_or_default();
            debug!(kind = ?kind, model_id, rows = table.len(), "model facts loaded");
            Ok(Arc::new(table))
        })
    }

    /// Dataset-wide summary used to populate filter choices.
    pub fn overview(&self) -> Result<Arc<DatasetOverview>> {
        self.overview_cache.get_or_compute(&QuerySignature::Overview, || {
            let conn = self.store.connect("overview")?;
            sqlite::fetch_overview(&conn)
                .map(Arc::new)
                .map_err(|e| ExplorerError::unavailable(self.store.path(), "overview", e))
        })
    }

    /// Stored document identifier of `model_id`, `None` when the model has none.
    pub fn document_id(&self, model_id: &str) -> Result<Option<String>> {
        let model_id = model_id.trim();
        let conn = self.store.connect("document lookup")?;
        sqlite::model_document(&conn, model_id)
            .map_err(|e| ExplorerError::unavailable(self.store.path(), "document lookup", e))?
            .ok_or_else(|| ExplorerError::ModelNotFound(model_id.to_string()))
    }

    /// Hand the stored document identifier of `model_id` to `resolver`.
    pub fn resolve_document(
        &self,
        model_id: &str,
        resolver: &dyn DocumentResolver,
    ) -> Result<Option<DocumentHandle>> {
        Ok(self
            .document_id(model_id)?
            .and_then(|document_id| resolver.resolve(&document_id)))
    }

    /// Resolver over the configured documents directory.
    pub fn document_resolver(&self) -> FsDocumentResolver {
        FsDocumentResolver::new(&self.config.docs_dir)
    }

    pub fn cache_stats(&self) -> ExplorerCacheStats {
        ExplorerCacheStats {
            search: self.search_cache.stats(),
            tables: self.table_cache.stats(),
            overview: self.overview_cache.stats(),
        }
    }

    pub fn clear_caches(&self) {
        self.search_cache.clear();
        self.table_cache.clear();
        self.overview_cache.clear();
    }
}
