//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde::Serialize;

use datakit_core::config::DataConfig;
use datakit_core::logging::init_logging;
use datakit_core::traits::Entity;
use datakit_core::types::SqlValue;
use datakit_database::migration::run_migrations;
use datakit_database::{DatabasePool, MemorySession, MemoryStore, Model, SqlEntity, SqliteSession, UnitOfWork};

/// Test category; `products` is populated only by eager loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct TestCategory {
    pub id: i64,
    pub name: String,
    #[sqlx(skip)]
    #[serde(skip)]
    pub products: Vec<TestProduct>,
}

impl Entity for TestCategory {
    type Key = i64;
    const NAME: &'static str = "test_categories";

    fn key(&self) -> i64 {
        self.id
    }

    fn has_transient_key(&self) -> bool {
        self.id == 0
    }

    fn assign_key(&mut self, generated: i64) {
        self.id = generated;
    }

    fn generated_key(&self) -> Option<i64> {
        Some(self.id)
    }
}

impl SqlEntity for TestCategory {
    const KEY_COLUMN: &'static str = "id";

    fn key_param(key: &i64) -> SqlValue {
        SqlValue::Integer(*key)
    }

    fn values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![("name", self.name.clone().into())]
    }
}

/// Test product; `category` is populated only by eager loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct TestProduct {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
    pub stock: i64,
    pub in_stock: bool,
    #[sqlx(skip)]
    #[serde(skip)]
    pub category: Option<TestCategory>,
}

impl TestProduct {
    /// A product without an id, ready to be added.
    pub fn draft(name: &str, category_id: i64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            category_id,
            stock: 10,
            in_stock: true,
            category: None,
        }
    }
}

impl Entity for TestProduct {
    type Key = i64;
    const NAME: &'static str = "test_products";

    fn key(&self) -> i64 {
        self.id
    }

    fn has_transient_key(&self) -> bool {
        self.id == 0
    }

    fn assign_key(&mut self, generated: i64) {
        self.id = generated;
    }

    fn generated_key(&self) -> Option<i64> {
        Some(self.id)
    }
}

impl SqlEntity for TestProduct {
    const KEY_COLUMN: &'static str = "id";

    fn key_param(key: &i64) -> SqlValue {
        SqlValue::Integer(*key)
    }

    fn values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("name", self.name.clone().into()),
            ("category_id", self.category_id.into()),
            ("stock", self.stock.into()),
            ("in_stock", self.in_stock.into()),
        ]
    }
}

/// `n` categories named `Name1..=Name{n}`.
pub fn categories(n: i64) -> Vec<TestCategory> {
    (1..=n)
        .map(|id| TestCategory {
            id,
            name: format!("Name{id}"),
            products: Vec::new(),
        })
        .collect()
}

/// `n` products: the first five in stock in category 1, the next five out of
/// stock in category 2, the rest in stock in category 3.
pub fn products(n: i64) -> Vec<TestProduct> {
    (1..=n)
        .map(|id| {
            let (category_id, stock, in_stock) = match id {
                1..=5 => (1, 300, true),
                6..=10 => (2, 0, false),
                _ => (3, 600, true),
            };
            TestProduct {
                id,
                name: format!("Name{id}"),
                category_id,
                stock,
                in_stock,
                category: None,
            }
        })
        .collect()
}

/// Install the test subscriber from the fixture config.
pub fn init_tracing() {
    if let Ok(config) = DataConfig::load("tests/fixtures/test_config") {
        init_logging(&config.logging);
    }
}

/// A memory store holding 20 categories and `n` products.
pub fn memory_store(n: i64) -> Arc<MemoryStore> {
    init_tracing();
    let store = MemoryStore::new();
    store.seed(categories(20)).expect("Failed to seed categories");
    store.seed(products(n)).expect("Failed to seed products");
    store
}

/// A unit of work over a seeded memory store.
pub fn memory_uow(n: i64) -> (Arc<MemoryStore>, UnitOfWork<MemorySession>) {
    let store = memory_store(n);
    let uow = UnitOfWork::new(MemorySession::new(Arc::clone(&store)));
    (store, uow)
}

/// Same as [`memory_uow`] with a global filter hiding out-of-stock products.
pub fn memory_uow_in_stock_only(n: i64) -> (Arc<MemoryStore>, UnitOfWork<MemorySession>) {
    let store = memory_store(n);
    let session = MemorySession::with_model(Arc::clone(&store), in_stock_model());
    (store, UnitOfWork::new(session))
}

/// A model whose products filter hides anything out of stock.
pub fn in_stock_model() -> Arc<Model> {
    Model::builder()
        .entity::<TestProduct>(|e| e.has_query_filter(|p: &TestProduct| p.in_stock))
        .build()
}

const CREATE_CATEGORIES: &str = "CREATE TABLE test_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
)";

const CREATE_PRODUCTS: &str = "CREATE TABLE test_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category_id INTEGER NOT NULL REFERENCES test_categories (id),
    stock INTEGER NOT NULL DEFAULT 0,
    in_stock BOOLEAN NOT NULL DEFAULT 1
)";

/// A migrated in-memory SQLite pool holding 20 categories and `n` products.
pub async fn sqlite_pool(n: i64) -> DatabasePool {
    init_tracing();
    let config = DataConfig::load("tests/fixtures/test_config").expect("Failed to load test config");
    let pool = DatabasePool::connect(&config.database)
        .await
        .expect("Failed to connect to test database");

    run_migrations(pool.pool())
        .await
        .expect("Failed to run migrations");

    for ddl in [CREATE_CATEGORIES, CREATE_PRODUCTS] {
        sqlx::query(ddl)
            .execute(pool.pool())
            .await
            .expect("Failed to create test table");
    }

    for category in categories(20) {
        sqlx::query("INSERT INTO test_categories (id, name) VALUES (?, ?)")
            .bind(category.id)
            .bind(&category.name)
            .execute(pool.pool())
            .await
            .expect("Failed to seed category");
    }
    for product in products(n) {
        sqlx::query(
            "INSERT INTO test_products (id, name, category_id, stock, in_stock) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.category_id)
        .bind(product.stock)
        .bind(product.in_stock)
        .execute(pool.pool())
        .await
        .expect("Failed to seed product");
    }

    pool
}

/// A unit of work over a seeded SQLite pool, with categories registered for
/// eager loading.
pub async fn sqlite_uow(n: i64) -> (DatabasePool, UnitOfWork<SqliteSession>) {
    let pool = sqlite_pool(n).await;
    let session = SqliteSession::builder(pool.clone())
        .entity::<TestCategory>()
        .entity::<TestProduct>()
        .build();
    (pool, UnitOfWork::new(session))
}

/// A second unit of work over an existing memory store.
pub fn memory_uow_on(store: &Arc<MemoryStore>) -> UnitOfWork<MemorySession> {
    UnitOfWork::new(MemorySession::new(Arc::clone(store)))
}
