//! Local entities produced by the remote source and persisted by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::ResourceType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub sku: String,
    pub price: Option<String>,
    pub regular_price: Option<String>,
    pub sale_price: Option<String>,
    pub status: String,
    pub stock_status: String,
    pub stock_quantity: Option<i64>,
    pub categories: Vec<String>,
    pub images: Vec<String>,
    /// When the local store last wrote this record; sources leave it empty.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub billing_address: String,
    pub billing_city: String,
    pub billing_state: String,
    pub billing_postcode: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub external_id: String,
    pub order_number: String,
    pub status: String,
    pub total_amount: Option<String>,
    pub currency: String,
    pub customer_external_id: Option<String>,
    pub billing_email: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Product(Product),
    Contact(Contact),
    Order(Order),
}

impl Record {
    pub fn external_id(&self) -> &str {
        match self {
            Record::Product(product) => &product.external_id,
            Record::Contact(contact) => &contact.external_id,
            Record::Order(order) => &order.external_id,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Record::Product(_) => ResourceType::Products,
            Record::Contact(_) => ResourceType::Customers,
            Record::Order(_) => ResourceType::Orders,
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Record::Product(product) => product.updated_at,
            Record::Contact(contact) => contact.updated_at,
            Record::Order(order) => order.updated_at,
        }
    }

    /// Copy stamped with the time the store wrote it.
    pub fn written_at(&self, at: DateTime<Utc>) -> Record {
        let mut record = self.clone();
        match &mut record {
            Record::Product(product) => product.updated_at = Some(at),
            Record::Contact(contact) => contact.updated_at = Some(at),
            Record::Order(order) => order.updated_at = Some(at),
        }
        record
    }

    /// Case-insensitive substring match over the fields each listing searches.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        let fields: Vec<&str> = match self {
            Record::Product(product) => {
                let mut fields = vec![
                    product.name.as_str(),
                    product.description.as_str(),
                    product.sku.as_str(),
                ];
                fields.extend(product.categories.iter().map(String::as_str));
                fields
            }
            Record::Contact(contact) => vec![
                contact.first_name.as_str(),
                contact.last_name.as_str(),
                contact.email.as_deref().unwrap_or_default(),
                contact.phone.as_deref().unwrap_or_default(),
            ],
            Record::Order(order) => vec![
                order.order_number.as_str(),
                order.status.as_str(),
                order.billing_email.as_deref().unwrap_or_default(),
            ],
        };
        fields
            .into_iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

impl From<Product> for Record {
    fn from(value: Product) -> Self {
        Record::Product(value)
    }
}

impl From<Contact> for Record {
    fn from(value: Contact) -> Self {
        Record::Contact(value)
    }
}

impl From<Order> for Record {
    fn from(value: Order) -> Self {
        Record::Order(value)
    }
}
