use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Products,
    Customers,
    Orders,
}

impl ResourceType {
    /// Processing order for a full sync.
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Products,
        ResourceType::Customers,
        ResourceType::Orders,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Products => "products",
            ResourceType::Customers => "customers",
            ResourceType::Orders => "orders",
        }
    }

    /// Singular noun used in progress messages.
    pub fn noun(self) -> &'static str {
        match self {
            ResourceType::Products => "product",
            ResourceType::Customers => "customer",
            ResourceType::Orders => "order",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ResourceType::Products => "Product",
            ResourceType::Customers => "Customer",
            ResourceType::Orders => "Order",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid sync type `{0}`; must be one of: products, customers, orders")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "products" => Ok(ResourceType::Products),
            "customers" => Ok(ResourceType::Customers),
            "orders" => Ok(ResourceType::Orders),
            other => Err(UnknownResourceType(other.to_string())),
        }
    }
}

/// What a run covers: every resource type, or a single one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SyncScope {
    All,
    Only(ResourceType),
}

impl SyncScope {
    pub fn resources(self) -> Vec<ResourceType> {
        match self {
            SyncScope::All => ResourceType::ALL.to_vec(),
            SyncScope::Only(resource) => vec![resource],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncScope::All => "all",
            SyncScope::Only(resource) => resource.as_str(),
        }
    }

    pub fn from_request(value: Option<&str>) -> Result<Self, UnknownResourceType> {
        match value.map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(SyncScope::All),
            Some(raw) => raw.parse().map(SyncScope::Only),
        }
    }
}

impl From<SyncScope> for String {
    fn from(scope: SyncScope) -> Self {
        scope.as_str().to_string()
    }
}

impl TryFrom<String> for SyncScope {
    type Error = UnknownResourceType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "all" {
            return Ok(SyncScope::All);
        }
        value.parse().map(SyncScope::Only)
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    InProgress,
    Success,
    Error,
    Stopped,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStatus::Success | SyncStatus::Error | SyncStatus::Stopped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    #[serde(rename = "type")]
    pub resource: ResourceType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub products: u64,
    pub customers: u64,
    pub orders: u64,
}

impl SyncStats {
    pub fn add(&mut self, resource: ResourceType, count: u64) {
        match resource {
            ResourceType::Products => self.products += count,
            ResourceType::Customers => self.customers += count,
            ResourceType::Orders => self.orders += count,
        }
    }

    pub fn get(&self, resource: ResourceType) -> u64 {
        match resource {
            ResourceType::Products => self.products,
            ResourceType::Customers => self.customers,
            ResourceType::Orders => self.orders,
        }
    }

    pub fn total(&self) -> u64 {
        self.products + self.customers + self.orders
    }
}

/// Snapshot of the single sync slot, exactly as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub status: SyncStatus,
    pub message: String,
    pub resource_type: SyncScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for SyncJob {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            message: "No sync has been run yet".to_string(),
            resource_type: SyncScope::All,
            progress: None,
            stats: None,
            run_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl SyncJob {
    pub fn is_in_progress(&self) -> bool {
        self.status == SyncStatus::InProgress
    }

    /// A freshly started run. Nothing from the previous run is carried over.
    pub(crate) fn started(scope: SyncScope, now: DateTime<Utc>) -> Self {
        let first = scope.resources()[0];
        Self {
            status: SyncStatus::InProgress,
            message: format!("Starting {} sync...", first.noun()),
            resource_type: scope,
            progress: Some(Progress {
                current: 0,
                total: 0,
                resource: first,
            }),
            stats: None,
            run_id: Some(Uuid::new_v4()),
            started_at: Some(now),
            finished_at: None,
        }
    }

    pub(crate) fn begin_resource(&mut self, resource: ResourceType) {
        if !self.is_in_progress() {
            return;
        }
        self.progress = Some(Progress {
            current: 0,
            total: 0,
            resource,
        });
        self.message = format!("Starting {} sync...", resource.noun());
    }

    /// Folds one fetched page into the progress counters. `reported_total` is
    /// only passed for the first page of a resource; the total never drops
    /// below what has already been processed.
    pub(crate) fn record_page(&mut self, count: u64, reported_total: Option<u64>) {
        if !self.is_in_progress() {
            return;
        }
        let Some(progress) = self.progress.as_mut() else {
            return;
        };
        progress.current += count;
        if let Some(total) = reported_total {
            progress.total = total;
        }
        progress.total = progress.total.max(progress.current);
        self.message = format!(
            "Processing {} {}/{}",
            progress.resource.noun(),
            progress.current,
            progress.total
        );
    }

    /// Moves an in-progress job to a terminal state. Ignored for any other
    /// state so a late writer can never resurrect or overwrite a finished run.
    pub(crate) fn finish(
        &mut self,
        status: SyncStatus,
        message: String,
        stats: Option<SyncStats>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_in_progress() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.message = message;
        self.progress = None;
        self.stats = if status == SyncStatus::Success {
            stats
        } else {
            None
        };
        self.finished_at = Some(now);
        true
    }

    pub(crate) fn success_message(scope: SyncScope) -> String {
        match scope {
            SyncScope::All => "All sync operations completed successfully".to_string(),
            SyncScope::Only(resource) => {
                format!("{} sync completed successfully", resource.title())
            }
        }
    }
}
