use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::job::ResourceType;
use crate::records::Record;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record {external_id} does not belong to {expected}")]
    ResourceMismatch {
        external_id: String,
        expected: ResourceType,
    },

    #[error("record is missing an external id")]
    MissingExternalId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    /// Trimmed, lowercased search term; `None` when blank.
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<Record>,
}

/// Local storage the sync writes into and the listing endpoints read from.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates or overwrites every record keyed by external id. All records
    /// of the page are written, or none are.
    async fn upsert_page(&self, resource: ResourceType, records: &[Record])
        -> Result<(), StoreError>;

    async fn list(&self, resource: ResourceType, query: &ListQuery)
        -> Result<RecordPage, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub(crate) fn validate_page(resource: ResourceType, records: &[Record]) -> Result<(), StoreError> {
    for record in records {
        if record.external_id().trim().is_empty() {
            return Err(StoreError::MissingExternalId);
        }
        if record.resource_type() != resource {
            return Err(StoreError::ResourceMismatch {
                external_id: record.external_id().to_string(),
                expected: resource,
            });
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<ResourceType, BTreeMap<String, Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, resource: ResourceType) -> usize {
        self.records
            .read()
            .await
            .get(&resource)
            .map_or(0, BTreeMap::len)
    }

    pub async fn get(&self, resource: ResourceType, external_id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .get(&resource)
            .and_then(|records| records.get(external_id))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_page(
        &self,
        resource: ResourceType,
        records: &[Record],
    ) -> Result<(), StoreError> {
        validate_page(resource, records)?;
        let now = Utc::now();
        let mut guard = self.records.write().await;
        let bucket = guard.entry(resource).or_default();
        for record in records {
            bucket.insert(record.external_id().to_string(), record.written_at(now));
        }
        Ok(())
    }

    async fn list(
        &self,
        resource: ResourceType,
        query: &ListQuery,
    ) -> Result<RecordPage, StoreError> {
        let needle = query.needle();
        let mut matched: Vec<Record> = {
            let guard = self.records.read().await;
            guard
                .get(&resource)
                .map(|records| {
                    records
                        .values()
                        .filter(|record| needle.as_deref().map_or(true, |n| record.matches(n)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        matched.sort_by(listing_order);

        let count = matched.len() as u64;
        let results = matched
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size() as usize)
            .collect();

        Ok(RecordPage {
            count,
            page: query.page(),
            page_size: query.page_size(),
            results,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Contacts by last then first name, orders newest first, products by name.
fn listing_order(left: &Record, right: &Record) -> Ordering {
    let primary = match (left, right) {
        (Record::Contact(a), Record::Contact(b)) => a
            .last_name
            .cmp(&b.last_name)
            .then_with(|| a.first_name.cmp(&b.first_name)),
        (Record::Order(a), Record::Order(b)) => match (a.order_date, b.order_date) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        (Record::Product(a), Record::Product(b)) => a.name.cmp(&b.name),
        _ => Ordering::Equal,
    };
    primary.then_with(|| left.external_id().cmp(right.external_id()))
}
