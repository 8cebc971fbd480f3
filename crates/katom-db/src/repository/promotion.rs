//! # Promotion Repository
//!
//! Stores promotion definitions and loads the ones a branch can use.
//!
//! A promotion is one `promotions` row (the rule flattened into nullable
//! columns), its product set in `promotion_products` (empty = bill level)
//! and the branches it runs at in `promotion_branches`.

use chrono::{DateTime, Utc};
use katom_core::promotion::{NewPromotion, PromotionRecord};
use katom_core::{CoreError, Promotion};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::new_id;
use crate::error::{DbError, DbResult};

const PROMOTION_COLUMNS: &str = r#"
    p.id, p.store_id, p.name, p.kind, p.percent_bps, p.amount_cents,
    p.set_price_cents, p.regular_price_cents, p.min_quantity,
    p.is_active, p.starts_at, p.ends_at
"#;

/// Repository for promotion definitions.
#[derive(Debug, Clone)]
pub struct PromotionRepository {
    pool: SqlitePool,
}

impl PromotionRepository {
    /// Creates a new PromotionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromotionRepository { pool }
    }

    /// Persists a promotion with its product and branch links.
    ///
    /// ## Errors
    /// - `Validation` for a malformed rule or window
    /// - `ProductNotFound` / `BranchNotFound` for links outside the store
    pub async fn create(&self, store_id: &str, input: &NewPromotion) -> DbResult<Promotion> {
        input.validate()?;

        let id = new_id();
        let now = Utc::now();
        let cols = input.rule.to_columns();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO promotions (
                id, store_id, name, kind, percent_bps, amount_cents,
                set_price_cents, regular_price_cents, min_quantity,
                is_active, starts_at, ends_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(&id)
        .bind(store_id)
        .bind(&input.name)
        .bind(cols.kind)
        .bind(cols.percent_bps)
        .bind(cols.amount_cents)
        .bind(cols.set_price_cents)
        .bind(cols.regular_price_cents)
        .bind(cols.min_quantity)
        .bind(input.starts_at)
        .bind(input.ends_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for product_id in &input.product_ids {
            if !exists_in_store(&mut tx, "products", product_id, store_id).await? {
                return Err(CoreError::ProductNotFound(product_id.clone()).into());
            }

            sqlx::query("INSERT INTO promotion_products (promotion_id, product_id) VALUES (?1, ?2)")
                .bind(&id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }

        for branch_id in &input.branch_ids {
            if !exists_in_store(&mut tx, "branches", branch_id, store_id).await? {
                return Err(CoreError::BranchNotFound(branch_id.clone()).into());
            }

            sqlx::query("INSERT INTO promotion_branches (promotion_id, branch_id) VALUES (?1, ?2)")
                .bind(&id)
                .bind(branch_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(promotion_id = %id, kind = %cols.kind, "Promotion created");

        Ok(Promotion {
            id,
            store_id: store_id.to_string(),
            name: input.name.clone(),
            rule: input.rule.clone(),
            product_ids: input.product_ids.clone(),
            is_active: true,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
        })
    }

    pub async fn get(&self, store_id: &str, promotion_id: &str) -> DbResult<Option<Promotion>> {
        let record = sqlx::query_as::<_, PromotionRecord>(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions p WHERE p.id = ?1 AND p.store_id = ?2"
        ))
        .bind(promotion_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// Promotions linked to the branch and running at `now`.
    pub async fn active_for_branch(
        &self,
        store_id: &str,
        branch_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Promotion>> {
        let records = sqlx::query_as::<_, PromotionRecord>(&format!(
            r#"
            SELECT {PROMOTION_COLUMNS}
            FROM promotions p
            JOIN promotion_branches pb ON pb.promotion_id = p.id
            WHERE p.store_id = ?1 AND pb.branch_id = ?2 AND p.is_active = 1
            ORDER BY p.created_at, p.rowid
            "#
        ))
        .bind(store_id)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut promotions = Vec::with_capacity(records.len());
        for record in records {
            let promotion = self.hydrate(record).await?;
            if promotion.is_active_at(now) {
                promotions.push(promotion);
            }
        }

        debug!(branch_id = %branch_id, count = promotions.len(), "Active promotions loaded");
        Ok(promotions)
    }

    /// Switches a promotion on or off.
    pub async fn set_active(&self, store_id: &str, promotion_id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE promotions SET is_active = ?3, updated_at = ?4 WHERE id = ?1 AND store_id = ?2",
        )
        .bind(promotion_id)
        .bind(store_id)
        .bind(active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::PromotionNotFound(promotion_id.to_string()).into());
        }

        info!(promotion_id = %promotion_id, active, "Promotion toggled");
        Ok(())
    }

    async fn hydrate(&self, record: PromotionRecord) -> DbResult<Promotion> {
        let product_ids: Vec<String> = sqlx::query_scalar(
            "SELECT product_id FROM promotion_products WHERE promotion_id = ?1 ORDER BY rowid",
        )
        .bind(&record.id)
        .fetch_all(&self.pool)
        .await?;

        record.into_promotion(product_ids).map_err(DbError::from)
    }
}

async fn exists_in_store(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
    store_id: &str,
) -> DbResult<bool> {
    let found: Option<String> = sqlx::query_scalar(&format!(
        "SELECT id FROM {table} WHERE id = ?1 AND store_id = ?2"
    ))
    .bind(id)
    .bind(store_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(found.is_some())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use chrono::Duration;
    use katom_core::promotion::{detect, CartLine, PromotionRule};
    use katom_core::{Money, Percent};

    fn ten_percent(fx: &Fixture) -> NewPromotion {
        NewPromotion {
            name: "Ten off".to_string(),
            rule: PromotionRule::PercentDiscount {
                percent: Percent::from_whole(10),
            },
            product_ids: Vec::new(),
            branch_ids: vec![fx.branch_id.clone()],
            starts_at: None,
            ends_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trips_rule() {
        let fx = fixture().await;
        let repo = fx.db.promotions();
        let input = NewPromotion {
            name: "Rice set".to_string(),
            rule: PromotionRule::FixedSetPrice {
                set_price: Money::from_cents(10_000),
                regular_price: Money::from_cents(12_500),
            },
            product_ids: vec![fx.product_ids[0].clone(), fx.product_ids[1].clone()],
            branch_ids: vec![fx.branch_id.clone()],
            starts_at: None,
            ends_at: None,
        };

        let created = repo.create(&fx.store_id, &input).await.unwrap();
        let loaded = repo.get(&fx.store_id, &created.id).await.unwrap().unwrap();

        assert_eq!(loaded.rule, input.rule);
        assert_eq!(loaded.product_ids, input.product_ids);
    }

    #[tokio::test]
    async fn test_active_for_branch_respects_links_and_window() {
        let fx = fixture().await;
        let repo = fx.db.promotions();
        let now = Utc::now();

        repo.create(&fx.store_id, &ten_percent(&fx)).await.unwrap();

        let mut expired = ten_percent(&fx);
        expired.name = "Last week".to_string();
        expired.starts_at = Some(now - Duration::days(14));
        expired.ends_at = Some(now - Duration::days(7));
        repo.create(&fx.store_id, &expired).await.unwrap();

        let mut elsewhere = ten_percent(&fx);
        elsewhere.branch_ids = vec![fx.other_branch_id.clone()];
        repo.create(&fx.store_id, &elsewhere).await.unwrap();

        let active = repo.active_for_branch(&fx.store_id, &fx.branch_id, now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Ten off");

        let cart = [CartLine::new(&fx.product_ids[0], 2, Money::from_cents(10_000))];
        let results = detect(&active, &cart, now);
        assert_eq!(results[0].discount.cents(), 2_000);
    }

    #[tokio::test]
    async fn test_set_active_hides_promotion() {
        let fx = fixture().await;
        let repo = fx.db.promotions();
        let promo = repo.create(&fx.store_id, &ten_percent(&fx)).await.unwrap();

        repo.set_active(&fx.store_id, &promo.id, false).await.unwrap();

        let active = repo
            .active_for_branch(&fx.store_id, &fx.branch_id, Utc::now())
            .await
            .unwrap();
        assert!(active.is_empty());
        assert!(matches!(
            repo.set_active(&fx.store_id, "nope", true).await,
            Err(DbError::Domain(CoreError::PromotionNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_branch() {
        let fx = fixture().await;
        let mut input = ten_percent(&fx);
        input.branch_ids = vec!["elsewhere".to_string()];

        let result = fx.db.promotions().create(&fx.store_id, &input).await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::BranchNotFound(_)))
        ));
        let active = fx
            .db
            .promotions()
            .active_for_branch(&fx.store_id, &fx.branch_id, Utc::now())
            .await
            .unwrap();
        assert!(active.is_empty());
    }
}
