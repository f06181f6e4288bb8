//! Integration tests for the repository and unit of work over SQLite.

mod helpers;

use datakit_core::error::ErrorKind;
use datakit_core::traits::{Repository, SaveOptions, Session};
use datakit_core::types::{Include, PageRequest, Predicate, QuerySpec, SqlValue};
use datakit_database::{AutoHistory, SqliteSession, UnitOfWork};

use helpers::{TestCategory, TestProduct};

fn by_id(id: i64) -> QuerySpec<TestProduct> {
    QuerySpec::new().filter(move |p: &TestProduct| p.id == id)
}

#[tokio::test]
async fn test_paged_list_of_five_has_eight_pages() {
    let (_pool, mut uow) = helpers::sqlite_uow(40).await;
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::first(5).unwrap())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 8);
    assert_eq!(page.count, 40);
    assert!(page.has_next());

    let all = repo
        .get_list(QuerySpec::new(), PageRequest::all())
        .await
        .unwrap();
    assert_eq!(all.items.len(), 40);
}

#[tokio::test]
async fn test_in_stock_products_with_category() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new()
        .filter(|p: &TestProduct| p.in_stock && p.category_id == 1)
        .include(Include::reference::<TestCategory, _, _>(
            |p: &TestProduct| Some(p.category_id),
            |p: &mut TestProduct, c: Option<TestCategory>| p.category = c,
        ));
    let page = repo
        .get_list(spec, PageRequest::first(5).unwrap())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 1);
    let category = page.items[0].category.as_ref().unwrap();
    assert_eq!(category.name, "Name1");
}

#[tokio::test]
async fn test_reads() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    assert_eq!(repo.get_all(QuerySpec::new()).await.unwrap().len(), 20);
    assert_eq!(repo.count().await.unwrap(), 20);
    assert_eq!(
        repo.count_where(Predicate::new(|p: &TestProduct| !p.in_stock))
            .await
            .unwrap(),
        5
    );
    assert_eq!(repo.get(&3).await.unwrap().map(|p| p.id), Some(3));
    assert!(repo.single_or_default(by_id(10001)).await.unwrap().is_none());

    let name = repo
        .get_field(Predicate::new(|p: &TestProduct| p.id == 3), |p: &TestProduct| {
            p.name.clone()
        })
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("Name3"));
}

#[tokio::test]
async fn test_raw_sql_with_parameters() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    let query = repo.get_sql(
        "SELECT * FROM test_products WHERE category_id = ? AND stock = ?",
        vec![SqlValue::from(2), SqlValue::from(0)],
    );
    let rows = repo.fetch_query(&query).await.unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|p| !p.in_stock));

    let page = repo
        .paginate_query(&query, PageRequest::first(2).unwrap())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.count, 5);
    assert_eq!(page.pages, 3);
}

#[tokio::test]
async fn test_raw_sql_honors_global_filter() {
    let pool = helpers::sqlite_pool(20).await;
    let session = SqliteSession::builder(pool)
        .model(helpers::in_stock_model())
        .build();
    let mut uow = UnitOfWork::new(session);
    let repo = uow.repository::<TestProduct>();

    let query = repo.get_sql(
        "SELECT * FROM test_products WHERE category_id = ?",
        vec![SqlValue::from(2)],
    );
    assert!(repo.fetch_query(&query).await.unwrap().is_empty());
    assert_eq!(repo.count().await.unwrap(), 15);
}

#[tokio::test]
async fn test_insert_uses_generated_rowid() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    let staged = repo.add(TestProduct::draft("Cool Product", 1)).await.unwrap();
    assert_eq!(uow.commit(SaveOptions::default()).await.unwrap(), 1);

    let saved = repo.tracked(staged.ticket).await.unwrap().unwrap();
    assert_eq!(saved.id, 21);
    assert_eq!(repo.count().await.unwrap(), 21);
}

#[tokio::test]
async fn test_update_round_trip() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    let mut detached = repo
        .single_or_default(by_id(1).no_tracking())
        .await
        .unwrap()
        .unwrap();
    detached.name = "Foo Bar".to_string();
    assert_eq!(
        repo.update(detached).await.unwrap_err().kind,
        ErrorKind::InvalidOperation
    );

    let mut product = repo.single_or_default(by_id(1)).await.unwrap().unwrap();
    product.name = "Foo Bar".to_string();
    repo.update(product).await.unwrap();
    uow.commit(SaveOptions::default()).await.unwrap();

    let stored = repo
        .single_or_default(by_id(1).no_tracking())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.name, "Foo Bar");
}

#[tokio::test]
async fn test_remove_and_execute_delete() {
    let (_pool, mut uow) = helpers::sqlite_uow(40).await;
    let repo = uow.repository::<TestProduct>();

    let product = repo.single_or_default(by_id(1)).await.unwrap().unwrap();
    repo.remove(product).await.unwrap();
    uow.commit(SaveOptions::default()).await.unwrap();
    assert!(repo.single_or_default(by_id(1)).await.unwrap().is_none());

    let deleted = repo
        .execute_delete(Predicate::new(|p: &TestProduct| p.category_id == 3))
        .await
        .unwrap();
    assert_eq!(deleted, 30);
    assert_eq!(repo.count().await.unwrap(), 9);
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let (pool, mut uow) = helpers::sqlite_uow(20).await;
    let products = uow.repository::<TestProduct>();
    let categories = uow.repository::<TestCategory>();

    categories
        .add(TestCategory {
            id: 0,
            name: "Orphan".to_string(),
            products: Vec::new(),
        })
        .await
        .unwrap();
    let mut product = products.get(&1).await.unwrap().unwrap();
    product.stock = 1;
    products.update(product).await.unwrap();

    let mut other = UnitOfWork::new(SqliteSession::new(pool));
    other
        .repository::<TestProduct>()
        .execute_delete(Predicate::new(|p: &TestProduct| p.id == 1))
        .await
        .unwrap();

    let err = uow.commit(SaveOptions::default()).await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(categories.count().await.unwrap(), 20);
    assert_eq!(uow.session().pending_changes().await.unwrap(), 2);
}

#[tokio::test]
async fn test_auto_history_in_same_transaction() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let products = uow.repository::<TestProduct>();

    products.add(TestProduct::draft("Audited", 1)).await.unwrap();
    assert_eq!(uow.commit(SaveOptions::with_history()).await.unwrap(), 2);

    let history = uow.repository::<AutoHistory>();
    let records = history.get_all(QuerySpec::new()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, "Added");
    assert_eq!(records[0].row_id, "21");
    assert_eq!(records[0].table_name, "test_products");
    assert_eq!(records[0].changed_json().unwrap()["name"], "Audited");
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let (pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();

    assert!(uow.can_connect().await);
    assert_eq!(uow.db_connection(), "sqlite::memory:");

    pool.close().await;
    assert!(!uow.can_connect().await);

    uow.dispose().await.unwrap();
    assert_eq!(repo.count().await.unwrap_err().kind, ErrorKind::InvalidOperation);
}

#[tokio::test]
async fn test_remove_category_with_its_products_in_one_commit() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let products = uow.repository::<TestProduct>();
    let categories = uow.repository::<TestCategory>();

    let children = products
        .get_all(QuerySpec::new().filter(|p: &TestProduct| p.category_id == 1))
        .await
        .unwrap();
    assert_eq!(children.len(), 5);
    for product in children {
        products.remove(product).await.unwrap();
    }
    let parent = categories.get(&1).await.unwrap().unwrap();
    categories.remove(parent).await.unwrap();

    assert_eq!(uow.commit(SaveOptions::default()).await.unwrap(), 6);
    assert_eq!(products.count().await.unwrap(), 15);
    assert_eq!(categories.count().await.unwrap(), 19);
    assert!(categories.get(&1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_add_category_with_a_product_in_one_commit() {
    let (_pool, mut uow) = helpers::sqlite_uow(20).await;
    let products = uow.repository::<TestProduct>();
    let categories = uow.repository::<TestCategory>();

    products.add(TestProduct::draft("Newcomer", 21)).await.unwrap();
    categories
        .add(TestCategory {
            id: 21,
            name: "Fresh".to_string(),
            products: Vec::new(),
        })
        .await
        .unwrap();

    assert_eq!(uow.commit(SaveOptions::default()).await.unwrap(), 2);
    assert_eq!(
        products
            .count_where(Predicate::new(|p: &TestProduct| p.category_id == 21))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_deserialized_page_request() {
    let (_pool, mut uow) = helpers::sqlite_uow(40).await;
    let repo = uow.repository::<TestProduct>();

    let request: PageRequest = serde_json::from_str(r#"{"index":7,"size":5}"#).unwrap();
    let page = repo.get_list(QuerySpec::new(), request).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.size, 5);
    assert_eq!(page.pages, 8);
    assert!(!page.has_next());

    let rejected = serde_json::from_str::<PageRequest>(r#"{"index":0,"size":0}"#).unwrap_err();
    assert!(rejected.to_string().contains("page size must be > 0"));
}

#[tokio::test]
async fn test_dispose_leaves_caller_pool_open() {
    let (pool, mut uow) = helpers::sqlite_uow(20).await;
    let repo = uow.repository::<TestProduct>();
    repo.add(TestProduct::draft("Discarded", 1)).await.unwrap();

    uow.dispose().await.unwrap();
    assert!(pool.health_check().await.unwrap());

    let mut next = UnitOfWork::new(SqliteSession::new(pool.clone()));
    assert_eq!(next.repository::<TestProduct>().count().await.unwrap(), 20);

    pool.close().await;
    assert!(!next.can_connect().await);
}
