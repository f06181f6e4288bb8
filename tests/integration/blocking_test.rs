//! Integration tests for the blocking unit of work and repository.

mod helpers;

use datakit_core::error::ErrorKind;
use datakit_core::traits::SaveOptions;
use datakit_core::types::{PageRequest, Predicate, QuerySpec};
use datakit_database::{BlockingUnitOfWork, MemorySession, SqliteSession};

use helpers::{TestCategory, TestProduct};

#[test]
fn test_blocking_reads_over_memory() {
    let store = helpers::memory_store(40);
    let mut uow = BlockingUnitOfWork::new(MemorySession::new(store)).unwrap();
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(
            QuerySpec::new().filter(|p: &TestProduct| p.category_id == 1),
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 1);

    assert_eq!(repo.count().unwrap(), 40);
    assert_eq!(repo.get(&3).unwrap().map(|p| p.name), Some("Name3".to_string()));
    assert!(uow.can_connect());
    assert_eq!(uow.db_connection(), "memory://default");
}

#[test]
fn test_blocking_commit_over_memory() {
    let store = helpers::memory_store(20);
    let mut uow = BlockingUnitOfWork::new(MemorySession::new(store.clone())).unwrap();
    let repo = uow.repository::<TestProduct>();

    let staged = repo
        .add_range(vec![TestProduct::draft("One", 1), TestProduct::draft("Two", 1)])
        .unwrap();
    assert_eq!(uow.commit(SaveOptions::default()).unwrap(), 2);
    assert_eq!(repo.tracked(staged[1].ticket).unwrap().map(|p| p.id), Some(22));

    let mut product = repo
        .single_or_default(QuerySpec::new().filter(|p: &TestProduct| p.id == 1))
        .unwrap()
        .unwrap();
    product.in_stock = false;
    repo.update(product).unwrap();
    uow.commit(SaveOptions::default()).unwrap();

    assert_eq!(
        repo.count_where(Predicate::new(|p: &TestProduct| !p.in_stock))
            .unwrap(),
        6
    );
    assert_eq!(store.len::<TestProduct>().unwrap(), 22);
}

#[test]
fn test_blocking_dispose() {
    let store = helpers::memory_store(20);
    let mut uow = BlockingUnitOfWork::new(MemorySession::new(store)).unwrap();
    let repo = uow.repository::<TestCategory>();
    assert_eq!(repo.count().unwrap(), 20);

    uow.dispose().unwrap();
    assert_eq!(repo.count().unwrap_err().kind, ErrorKind::InvalidOperation);
}

#[test]
fn test_blocking_over_sqlite() {
    let mut uow = BlockingUnitOfWork::open(|| async {
        let pool = helpers::sqlite_pool(40).await;
        Ok(SqliteSession::builder(pool).entity::<TestCategory>().build())
    })
    .unwrap();
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::first(5).unwrap())
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 8);

    let deleted = repo
        .execute_delete(Predicate::new(|p: &TestProduct| p.category_id == 2))
        .unwrap();
    assert_eq!(deleted, 5);
    assert_eq!(repo.count().unwrap(), 35);
    assert_eq!(uow.db_connection(), "sqlite::memory:");
}
