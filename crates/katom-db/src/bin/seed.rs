//! # Demo Store Seeder
//!
//! Populates an empty database with one demo store for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./katom_dev.db with 20 units of every product per branch
//! cargo run -p katom-db --bin seed
//!
//! # Custom opening stock and database path
//! cargo run -p katom-db --bin seed -- --stock 50 --db ./data/katom.db
//! ```
//!
//! ## Generated Data
//! - One store with a "Main" and a "Riverside" branch
//! - A small drinks / food / dessert menu, some items redeemable for points
//! - Opening stock at both branches (RECEIVE movements)
//! - Two members
//! - A 10% bill promotion and a bundle price at the main branch

use katom_core::promotion::{NewPromotion, PromotionRule};
use katom_core::{Money, MovementKind, Percent, StockAdjustment};
use katom_db::{Database, DbConfig, NewProduct};
use std::env;

const SEED_ACTOR: &str = "seed";

/// (category, name, price in cents, points to redeem)
const MENU: &[(&str, &str, i64, Option<i64>)] = &[
    ("drinks", "Thai Milk Tea", 4_500, Some(10)),
    ("drinks", "Green Tea Latte", 5_500, Some(10)),
    ("drinks", "Iced Americano", 6_000, None),
    ("drinks", "Lime Soda", 3_500, None),
    ("food", "Pad Kra Pao", 7_000, None),
    ("food", "Khao Man Gai", 6_500, None),
    ("food", "Som Tam", 5_000, None),
    ("dessert", "Mango Sticky Rice", 8_000, Some(8)),
    ("dessert", "Coconut Ice Cream", 4_000, Some(6)),
    ("dessert", "Roti Banana", 4_500, None),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut opening_stock: i64 = 20;
    let mut db_path = String::from("./katom_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--stock" | "-s" => {
                if i + 1 < args.len() {
                    opening_stock = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Katom POS Demo Store Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --stock <N>    Opening stock per product and branch (default: 20)");
                println!("  -d, --db <PATH>    Database file path (default: ./katom_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Katom POS Demo Store Seeder");
    println!("===========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let catalog = db.catalog();
    let existing = catalog.store_count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} store(s)", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let store_id = catalog.create_store("Katom Demo Cafe").await?;
    let main = catalog.create_branch(&store_id, "Main").await?;
    let riverside = catalog.create_branch(&store_id, "Riverside").await?;
    println!("✓ Store {} with branches Main, Riverside", store_id);

    let mut product_ids = Vec::with_capacity(MENU.len());
    for (category, name, price_cents, points) in MENU {
        let mut input = NewProduct::new(&store_id, *name, *price_cents).category(*category);
        if let Some(points) = points {
            input = input.redeemable_for(*points);
        }
        product_ids.push(catalog.create_product(&input).await?.id);
    }
    println!("✓ {} products", product_ids.len());

    let stock = db.stock();
    for branch in [&main, &riverside] {
        for product_id in &product_ids {
            stock
                .adjust(
                    &StockAdjustment::new(
                        &store_id,
                        &branch.id,
                        product_id,
                        opening_stock,
                        MovementKind::Receive,
                        SEED_ACTOR,
                    )
                    .with_reason("opening stock"),
                )
                .await?;
        }
    }
    println!("✓ Opening stock {} per product at each branch", opening_stock);

    catalog
        .create_customer(&store_id, "M0001", "Somchai Jaidee", Some("4821"))
        .await?;
    catalog
        .create_customer(&store_id, "M0002", "Malee Srisuk", None)
        .await?;
    println!("✓ 2 members");

    let promotions = db.promotions();
    promotions
        .create(
            &store_id,
            &NewPromotion {
                name: "Opening week 10% off".to_string(),
                rule: PromotionRule::PercentDiscount {
                    percent: Percent::from_whole(10),
                },
                product_ids: Vec::new(),
                branch_ids: vec![main.id.clone()],
                starts_at: None,
                ends_at: None,
            },
        )
        .await?;
    // Thai Milk Tea + Mango Sticky Rice
    promotions
        .create(
            &store_id,
            &NewPromotion {
                name: "Tea and mango set".to_string(),
                rule: PromotionRule::FixedSetPrice {
                    set_price: Money::from_cents(11_000),
                    regular_price: Money::from_cents(12_500),
                },
                product_ids: vec![product_ids[0].clone(), product_ids[7].clone()],
                branch_ids: vec![main.id.clone(), riverside.id.clone()],
                starts_at: None,
                ends_at: None,
            },
        )
        .await?;
    println!("✓ 2 promotions");

    println!();
    println!("✓ Seed complete!");
    println!("  store_id  = {}", store_id);
    println!("  branch_id = {} (Main)", main.id);

    Ok(())
}
