use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::job::ResourceType;
use crate::records::Record;

/// 1-based page number understood by the upstream API.
pub type Cursor = u32;

#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<Record>,
    /// Total number of records the upstream reports for this resource type.
    pub total: u64,
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("{source_name} does not serve {resource}")]
    Unsupported {
        source_name: &'static str,
        resource: ResourceType,
    },
}

/// Upstream platform the controller pages through.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_page(
        &self,
        resource: ResourceType,
        cursor: Option<Cursor>,
    ) -> Result<SourcePage, SourceError>;
}

/// Sends each resource type to the upstream registered for it, and every
/// other type to the fallback.
pub struct RoutedSource {
    fallback: Arc<dyn RemoteSource>,
    routes: HashMap<ResourceType, Arc<dyn RemoteSource>>,
}

impl RoutedSource {
    pub fn new(fallback: Arc<dyn RemoteSource>) -> Self {
        Self {
            fallback,
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, resource: ResourceType, source: Arc<dyn RemoteSource>) -> Self {
        self.routes.insert(resource, source);
        self
    }
}

#[async_trait]
impl RemoteSource for RoutedSource {
    async fn fetch_page(
        &self,
        resource: ResourceType,
        cursor: Option<Cursor>,
    ) -> Result<SourcePage, SourceError> {
        let source = self.routes.get(&resource).unwrap_or(&self.fallback);
        source.fetch_page(resource, cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;

    #[tokio::test]
    async fn routed_resources_bypass_the_fallback() {
        let fallback = Arc::new(
            ScriptedSource::new()
                .with_pages(ResourceType::Products, &[1])
                .with_pages(ResourceType::Customers, &[5]),
        );
        let contacts = Arc::new(ScriptedSource::new().with_pages(ResourceType::Customers, &[2]));
        let source =
            RoutedSource::new(fallback.clone()).route(ResourceType::Customers, contacts.clone());

        let page = source.fetch_page(ResourceType::Customers, None).await.unwrap();
        assert_eq!(page.records.len(), 2);
        let page = source.fetch_page(ResourceType::Products, None).await.unwrap();
        assert_eq!(page.records.len(), 1);

        assert_eq!(contacts.calls().await, vec![(ResourceType::Customers, None)]);
        assert_eq!(fallback.calls().await, vec![(ResourceType::Products, None)]);
    }
}
