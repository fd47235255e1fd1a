//! WooCommerce and GoHighLevel to local store synchronization: the job
//! controller, its status slot, the remote source adapters and the record
//! stores.

pub mod controller;
pub mod gohighlevel;
pub mod job;
pub mod pg_store;
pub mod records;
pub mod source;
pub mod status_store;
pub mod store;
pub mod woocommerce;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use controller::{StartError, SyncController};
pub use gohighlevel::{GoHighLevelConfig, GoHighLevelSource};
pub use job::{Progress, ResourceType, SyncJob, SyncScope, SyncStats, SyncStatus, UnknownResourceType};
pub use pg_store::PgRecordStore;
pub use records::{Contact, Order, Product, Record};
pub use source::{Cursor, RemoteSource, RoutedSource, SourceError, SourcePage};
pub use status_store::SyncStatusStore;
pub use store::{ListQuery, MemoryRecordStore, RecordPage, RecordStore, StoreError};
pub use woocommerce::{WooCommerceConfig, WooCommerceSource};
