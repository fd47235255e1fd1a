//! In-process doubles for driving the controller without a real upstream.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use crate::controller::SyncController;
use crate::job::{ResourceType, SyncJob};
use crate::records::{Contact, Order, Product, Record};
use crate::source::{Cursor, RemoteSource, SourceError, SourcePage};

type Scripted = Result<SourcePage, SourceError>;

/// Serves queued pages per resource type. An exhausted queue yields an empty
/// final page. With a gate, every fetch waits for one permit first.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<ResourceType, VecDeque<Scripted>>>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<(ResourceType, Option<Cursor>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: u32,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues generated pages of the given sizes, chained by cursor, each
    /// reporting the sum of all sizes as total.
    pub fn with_pages(mut self, resource: ResourceType, sizes: &[usize]) -> Self {
        let total: usize = sizes.iter().sum();
        for (index, size) in sizes.iter().enumerate() {
            let records = (0..*size)
                .map(|_| {
                    self.next_id += 1;
                    record_for(resource, &self.next_id.to_string())
                })
                .collect();
            let next_cursor = (index + 1 < sizes.len()).then(|| index as Cursor + 2);
            self = self.with_page(
                resource,
                SourcePage {
                    records,
                    total: total as u64,
                    next_cursor,
                },
            );
        }
        self
    }

    pub fn with_page(mut self, resource: ResourceType, page: SourcePage) -> Self {
        self.pages
            .get_mut()
            .entry(resource)
            .or_default()
            .push_back(Ok(page));
        self
    }

    pub fn with_error(mut self, resource: ResourceType, error: SourceError) -> Self {
        self.pages
            .get_mut()
            .entry(resource)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Holds every fetch until the returned semaphore hands out a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub async fn calls(&self) -> Vec<(ResourceType, Option<Cursor>)> {
        self.calls.lock().await.clone()
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn fetch_page(
        &self,
        resource: ResourceType,
        cursor: Option<Cursor>,
    ) -> Result<SourcePage, SourceError> {
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().await.push((resource, cursor));

        if let Some(gate) = self.gate.as_ref() {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let next = self
            .pages
            .lock()
            .await
            .get_mut(&resource)
            .and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Ok(SourcePage::default()))
    }
}

pub fn product(id: &str) -> Record {
    Record::Product(Product {
        external_id: id.to_string(),
        name: format!("Product {id}"),
        description: String::new(),
        sku: format!("SKU-{id}"),
        price: Some("19.99".to_string()),
        regular_price: Some("19.99".to_string()),
        sale_price: None,
        status: "publish".to_string(),
        stock_status: "instock".to_string(),
        stock_quantity: Some(3),
        categories: Vec::new(),
        images: Vec::new(),
        updated_at: None,
    })
}

pub fn contact(id: &str) -> Record {
    Record::Contact(Contact {
        external_id: id.to_string(),
        first_name: "Customer".to_string(),
        last_name: id.to_string(),
        email: Some(format!("customer{id}@example.test")),
        phone: None,
        billing_address: String::new(),
        billing_city: String::new(),
        billing_state: String::new(),
        billing_postcode: String::new(),
        updated_at: None,
    })
}

pub fn order(id: &str) -> Record {
    Record::Order(Order {
        external_id: id.to_string(),
        order_number: id.to_string(),
        status: "completed".to_string(),
        total_amount: Some("42.00".to_string()),
        currency: "USD".to_string(),
        customer_external_id: None,
        billing_email: None,
        order_date: None,
        updated_at: None,
    })
}

pub fn record_for(resource: ResourceType, id: &str) -> Record {
    match resource {
        ResourceType::Products => product(id),
        ResourceType::Customers => contact(id),
        ResourceType::Orders => order(id),
    }
}

/// Polls the controller until `predicate` holds; panics after five seconds.
pub async fn wait_for<F>(controller: &SyncController, mut predicate: F) -> SyncJob
where
    F: FnMut(&SyncJob) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = controller.status().await;
        if predicate(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached, last status: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_until_terminal(controller: &SyncController) -> SyncJob {
    wait_for(controller, |job| job.status.is_terminal()).await
}
