// docstore-core/src/lib.rs
// Embeddable in-memory document store - query matching, updates, cursors, grouping

pub mod aggregation;
pub mod collection_core;
pub mod config;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod query;
pub mod update;
pub mod value_utils;

// Public exports
pub use aggregation::{Emitter, GroupSpec, MapReduce};
pub use collection_core::{CollectionCore, InsertManyResult};
pub use config::{DatabaseConfig, IdGeneration};
pub use cursor::{Cursor, CursorIter, QueryPlan};
pub use database::DatabaseCore;
pub use document::{Document, DocumentId};
pub use error::{DocStoreError, Result};
pub use find_options::{FindOptions, SortOrder};
pub use index::IndexInfo;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use query::{matches_filter, Query};
pub use update::{UpdateOptions, UpdateResult, UpdateSpec};
