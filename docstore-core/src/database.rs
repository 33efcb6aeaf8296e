// docstore-core/src/database.rs
// Database handle: named collections and convenience delegation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::collection_core::CollectionCore;
use crate::config::DatabaseConfig;
use crate::cursor::{Cursor, QueryPlan};
use crate::document::DocumentId;
use crate::error::{DocStoreError, Result};
use crate::find_options::FindOptions;
use crate::logging::set_log_level;
use crate::query::Query;
use crate::update::{UpdateOptions, UpdateResult};

/// In-memory database
///
/// Collections are created on first use and shared as `Arc<CollectionCore>`,
/// so handles stay valid (and usable from other threads) after lookup.
pub struct DatabaseCore {
    config: DatabaseConfig,
    collections: DashMap<String, Arc<CollectionCore>>,
}

impl Default for DatabaseCore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseCore {
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        if let Some(level) = config.log_level {
            set_log_level(level);
        }
        DatabaseCore {
            config,
            collections: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // ========== COLLECTIONS ==========

    /// Get a collection, creating it when it does not exist yet
    pub fn collection(&self, name: &str) -> Arc<CollectionCore> {
        if let Some(existing) = self.collections.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.collections.entry(name.to_string()).or_insert_with(|| {
            log::info!("created collection {}", name);
            Arc::new(CollectionCore::new(name, self.config.id_generation))
        });
        Arc::clone(entry.value())
    }

    pub fn get_collection(&self, name: &str) -> Option<Arc<CollectionCore>> {
        self.collections.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Create a collection explicitly; fails when the name is taken
    pub fn create_collection(&self, name: &str) -> Result<Arc<CollectionCore>> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(_) => Err(DocStoreError::CollectionExists(name.to_string())),
            Entry::Vacant(vacant) => {
                let collection = Arc::new(CollectionCore::new(name, self.config.id_generation));
                vacant.insert(Arc::clone(&collection));
                log::info!("created collection {}", name);
                Ok(collection)
            }
        }
    }

    /// Collection names, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns `true` if the collection existed
    pub fn drop_collection(&self, name: &str) -> bool {
        let dropped = self.collections.remove(name).is_some();
        if dropped {
            log::info!("dropped collection {}", name);
        }
        dropped
    }

    // ========== DELEGATING OPERATIONS ==========

    pub fn insert(&self, collection: &str, document: Value) -> Result<DocumentId> {
        self.collection(collection).insert_one(document)
    }

    /// Find in a collection; an unknown collection yields an empty cursor
    pub fn find(&self, collection: &str, filter: &Value, options: FindOptions) -> Result<Cursor> {
        match self.get_collection(collection) {
            Some(c) => c.find_with_options(filter, options),
            None => {
                Query::parse(filter)?;
                options.validate()?;
                Ok(Cursor::new(Vec::new(), options, QueryPlan::default()))
            }
        }
    }

    /// Update in a collection; an upsert creates the collection when needed
    pub fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        if let Some(c) = self.get_collection(collection) {
            return c.update(filter, update, options);
        }
        // A rejected upsert must not leave an empty collection behind
        Query::parse(filter)?;
        crate::update::UpdateSpec::parse(update)?;
        if options.upsert {
            self.collection(collection).update(filter, update, options)
        } else {
            Ok(UpdateResult::default())
        }
    }

    pub fn remove(&self, collection: &str, filter: &Value) -> Result<u64> {
        match self.get_collection(collection) {
            Some(c) => c.remove(filter),
            None => {
                Query::parse(filter)?;
                Ok(0)
            }
        }
    }
}
