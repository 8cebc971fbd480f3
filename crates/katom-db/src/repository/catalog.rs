//! # Catalog Repository
//!
//! Lookups the commerce core needs from the surrounding catalog: stores,
//! branches, products and customers. Everything is scoped by store.
//!
//! The insert helpers exist for seeding and tests. Member and product
//! management live outside this system.

use chrono::Utc;
use katom_core::validation::{validate_non_negative, validate_required};
use katom_core::{Branch, CoreError, Customer, Product};
use sqlx::SqlitePool;
use tracing::debug;

use super::new_id;
use crate::error::DbResult;

/// Input for [`CatalogRepository::create_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub store_id: String,
    pub name: String,
    pub category: Option<String>,
    pub base_price_cents: i64,
    pub points_to_redeem: Option<i64>,
}

impl NewProduct {
    pub fn new(store_id: impl Into<String>, name: impl Into<String>, base_price_cents: i64) -> Self {
        NewProduct {
            store_id: store_id.into(),
            name: name.into(),
            category: None,
            base_price_cents,
            points_to_redeem: None,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn redeemable_for(mut self, points: i64) -> Self {
        self.points_to_redeem = Some(points);
        self
    }
}

/// Repository for catalog lookups.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn branch(&self, store_id: &str, branch_id: &str) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>(
            r#"
            SELECT id, store_id, name, is_shift_opened, shift_opened_at, shift_closed_at, created_at
            FROM branches
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(branch_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(branch)
    }

    pub async fn product(&self, store_id: &str, product_id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, store_id, name, category, base_price_cents, points_to_redeem,
                   is_active, created_at, updated_at
            FROM products
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(product_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Resolves every id or fails with `ProductNotFound` for the first missing one.
    ///
    /// Results follow the order of `product_ids`.
    pub async fn require_products(
        &self,
        store_id: &str,
        product_ids: &[&str],
    ) -> DbResult<Vec<Product>> {
        let mut products = Vec::with_capacity(product_ids.len());
        for id in product_ids {
            match self.product(store_id, id).await? {
                Some(product) => products.push(product),
                None => return Err(CoreError::ProductNotFound(id.to_string()).into()),
            }
        }
        Ok(products)
    }

    pub async fn customer(&self, store_id: &str, customer_id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, store_id, code, full_name, phone_last4, created_at
            FROM customers
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(customer_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn store_count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stores")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Inserts (seed data and tests)
    // =========================================================================

    /// Creates a store and returns its id.
    pub async fn create_store(&self, name: &str) -> DbResult<String> {
        validate_required("name", name)?;
        let id = new_id();

        sqlx::query("INSERT INTO stores (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        debug!(store_id = %id, "Store created");
        Ok(id)
    }

    pub async fn create_branch(&self, store_id: &str, name: &str) -> DbResult<Branch> {
        validate_required("name", name)?;
        let branch = Branch {
            id: new_id(),
            store_id: store_id.to_string(),
            name: name.to_string(),
            is_shift_opened: false,
            shift_opened_at: None,
            shift_closed_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO branches (id, store_id, name, is_shift_opened, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
        )
        .bind(&branch.id)
        .bind(&branch.store_id)
        .bind(&branch.name)
        .bind(branch.created_at)
        .execute(&self.pool)
        .await?;

        debug!(branch_id = %branch.id, store_id = %store_id, "Branch created");
        Ok(branch)
    }

    pub async fn create_product(&self, input: &NewProduct) -> DbResult<Product> {
        validate_required("name", &input.name)?;
        validate_non_negative("base_price_cents", input.base_price_cents)?;
        if let Some(points) = input.points_to_redeem {
            validate_non_negative("points_to_redeem", points)?;
        }

        let now = Utc::now();
        let product = Product {
            id: new_id(),
            store_id: input.store_id.clone(),
            name: input.name.clone(),
            category: input.category.clone(),
            base_price_cents: input.base_price_cents,
            points_to_redeem: input.points_to_redeem,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO products (
                id, store_id, name, category, base_price_cents, points_to_redeem,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
            "#,
        )
        .bind(&product.id)
        .bind(&product.store_id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.base_price_cents)
        .bind(product.points_to_redeem)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(product_id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    pub async fn create_customer(
        &self,
        store_id: &str,
        code: &str,
        full_name: &str,
        phone_last4: Option<&str>,
    ) -> DbResult<Customer> {
        validate_required("code", code)?;
        validate_required("full_name", full_name)?;

        let customer = Customer {
            id: new_id(),
            store_id: store_id.to_string(),
            code: code.to_string(),
            full_name: full_name.to_string(),
            phone_last4: phone_last4.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO customers (id, store_id, code, full_name, phone_last4, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.store_id)
        .bind(&customer.code)
        .bind(&customer.full_name)
        .bind(&customer.phone_last4)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;

        debug!(customer_id = %customer.id, "Customer created");
        Ok(customer)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
