use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder, Row, Transaction};

use crate::job::ResourceType;
use crate::records::{Contact, Order, Product, Record};
use crate::store::{validate_page, ListQuery, RecordPage, RecordStore, StoreError};

/// Postgres-backed record store over the `crm` schema.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool<Postgres>,
}

impl PgRecordStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert_page(
        &self,
        resource: ResourceType,
        records: &[Record],
    ) -> Result<(), StoreError> {
        validate_page(resource, records)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            match record {
                Record::Product(product) => upsert_product(&mut tx, product).await?,
                Record::Contact(contact) => upsert_contact(&mut tx, contact).await?,
                Record::Order(order) => upsert_order(&mut tx, order).await?,
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list(
        &self,
        resource: ResourceType,
        query: &ListQuery,
    ) -> Result<RecordPage, StoreError> {
        let (table, columns, search_columns, order_by) = listing_layout(resource);
        let needle = query.needle().map(|term| format!("%{}%", escape_like(&term)));

        let mut count_query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {table}"));
        push_search(&mut count_query, search_columns, needle.as_deref());
        let count: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {columns} FROM {table}"));
        push_search(&mut select, search_columns, needle.as_deref());
        select.push(format!(" ORDER BY {order_by}, external_id ASC LIMIT "));
        select.push_bind(i64::from(query.page_size()));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(match resource {
                ResourceType::Products => Record::Product(product_from_row(&row)?),
                ResourceType::Customers => Record::Contact(contact_from_row(&row)?),
                ResourceType::Orders => Record::Order(order_from_row(&row)?),
            });
        }

        Ok(RecordPage {
            count: u64::try_from(count).unwrap_or(0),
            page: query.page(),
            page_size: query.page_size(),
            results,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const PRODUCT_COLUMNS: &str = "external_id, name, description, sku, price, regular_price, sale_price, status, stock_status, stock_quantity, categories, images, updated_at";
const CONTACT_COLUMNS: &str = "external_id, first_name, last_name, email, phone, billing_address, billing_city, billing_state, billing_postcode, updated_at";
const ORDER_COLUMNS: &str = "external_id, order_number, status, total_amount, currency, customer_external_id, billing_email, order_date, updated_at";

fn listing_layout(
    resource: ResourceType,
) -> (&'static str, &'static str, &'static [&'static str], &'static str) {
    match resource {
        ResourceType::Products => (
            "crm.products",
            PRODUCT_COLUMNS,
            &[
                "COALESCE(name, '')",
                "COALESCE(description, '')",
                "COALESCE(sku, '')",
                "categories::text",
            ],
            "name ASC",
        ),
        ResourceType::Customers => (
            "crm.contacts",
            CONTACT_COLUMNS,
            &[
                "COALESCE(first_name, '')",
                "COALESCE(last_name, '')",
                "COALESCE(email, '')",
                "COALESCE(phone, '')",
            ],
            "last_name ASC, first_name ASC",
        ),
        ResourceType::Orders => (
            "crm.orders",
            ORDER_COLUMNS,
            &[
                "COALESCE(order_number, '')",
                "COALESCE(status, '')",
                "COALESCE(billing_email, '')",
            ],
            "order_date DESC NULLS LAST",
        ),
    }
}

/// `expressions` are text-valued SQL expressions matched with ILIKE.
fn push_search(
    builder: &mut QueryBuilder<Postgres>,
    expressions: &[&str],
    pattern: Option<&str>,
) {
    let Some(pattern) = pattern else {
        return;
    };
    builder.push(" WHERE (");
    for (index, expression) in expressions.iter().enumerate() {
        if index > 0 {
            builder.push(" OR ");
        }
        builder.push(format!("{expression} ILIKE "));
        builder.push_bind(pattern.to_string());
    }
    builder.push(")");
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn upsert_product(
    tx: &mut Transaction<'_, Postgres>,
    product: &Product,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO crm.products \
         (external_id, name, description, sku, price, regular_price, sale_price, status, stock_status, stock_quantity, categories, images) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (external_id) DO UPDATE SET \
         name = EXCLUDED.name, description = EXCLUDED.description, sku = EXCLUDED.sku, \
         price = EXCLUDED.price, regular_price = EXCLUDED.regular_price, sale_price = EXCLUDED.sale_price, \
         status = EXCLUDED.status, stock_status = EXCLUDED.stock_status, stock_quantity = EXCLUDED.stock_quantity, \
         categories = EXCLUDED.categories, images = EXCLUDED.images, updated_at = NOW()",
    )
    .bind(&product.external_id)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.sku)
    .bind(&product.price)
    .bind(&product.regular_price)
    .bind(&product.sale_price)
    .bind(&product.status)
    .bind(&product.stock_status)
    .bind(product.stock_quantity)
    .bind(Json(&product.categories))
    .bind(Json(&product.images))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_contact(
    tx: &mut Transaction<'_, Postgres>,
    contact: &Contact,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO crm.contacts \
         (external_id, first_name, last_name, email, phone, billing_address, billing_city, billing_state, billing_postcode) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (external_id) DO UPDATE SET \
         first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name, email = EXCLUDED.email, \
         phone = EXCLUDED.phone, billing_address = EXCLUDED.billing_address, billing_city = EXCLUDED.billing_city, \
         billing_state = EXCLUDED.billing_state, billing_postcode = EXCLUDED.billing_postcode, updated_at = NOW()",
    )
    .bind(&contact.external_id)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(&contact.email)
    .bind(&contact.phone)
    .bind(&contact.billing_address)
    .bind(&contact.billing_city)
    .bind(&contact.billing_state)
    .bind(&contact.billing_postcode)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO crm.orders \
         (external_id, order_number, status, total_amount, currency, customer_external_id, billing_email, order_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (external_id) DO UPDATE SET \
         order_number = EXCLUDED.order_number, status = EXCLUDED.status, total_amount = EXCLUDED.total_amount, \
         currency = EXCLUDED.currency, customer_external_id = EXCLUDED.customer_external_id, \
         billing_email = EXCLUDED.billing_email, order_date = EXCLUDED.order_date, updated_at = NOW()",
    )
    .bind(&order.external_id)
    .bind(&order.order_number)
    .bind(&order.status)
    .bind(&order.total_amount)
    .bind(&order.currency)
    .bind(&order.customer_external_id)
    .bind(&order.billing_email)
    .bind(order.order_date)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    let categories: Json<Vec<String>> = row.try_get("categories")?;
    let images: Json<Vec<String>> = row.try_get("images")?;
    Ok(Product {
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        sku: row.try_get("sku")?,
        price: row.try_get("price")?,
        regular_price: row.try_get("regular_price")?,
        sale_price: row.try_get("sale_price")?,
        status: row.try_get("status")?,
        stock_status: row.try_get("stock_status")?,
        stock_quantity: row.try_get("stock_quantity")?,
        categories: categories.0,
        images: images.0,
        updated_at: row.try_get("updated_at")?,
    })
}

fn contact_from_row(row: &PgRow) -> Result<Contact, sqlx::Error> {
    Ok(Contact {
        external_id: row.try_get("external_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        billing_address: row.try_get("billing_address")?,
        billing_city: row.try_get("billing_city")?,
        billing_state: row.try_get("billing_state")?,
        billing_postcode: row.try_get("billing_postcode")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        external_id: row.try_get("external_id")?,
        order_number: row.try_get("order_number")?,
        status: row.try_get("status")?,
        total_amount: row.try_get("total_amount")?,
        currency: row.try_get("currency")?,
        customer_external_id: row.try_get("customer_external_id")?,
        billing_email: row.try_get("billing_email")?,
        order_date: row.try_get("order_date")?,
        updated_at: row.try_get("updated_at")?,
    })
}
