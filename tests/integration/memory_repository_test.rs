//! Integration tests for repository reads over the memory session.

mod helpers;

use tokio_util::sync::CancellationToken;

use datakit_core::error::ErrorKind;
use datakit_core::traits::Repository;
use datakit_core::types::{FETCH_ALL, Include, OrderBy, PageRequest, Predicate, QuerySpec};

use helpers::{TestCategory, TestProduct};

fn with_category() -> Include<TestProduct> {
    Include::reference::<TestCategory, _, _>(
        |p: &TestProduct| Some(p.category_id),
        |p: &mut TestProduct, c: Option<TestCategory>| p.category = c,
    )
}

fn with_products() -> Include<TestCategory> {
    Include::collection::<TestProduct, _, _>(
        |c: &TestCategory, p: &TestProduct| p.category_id == c.id,
        |c: &mut TestCategory, products: Vec<TestProduct>| c.products = products,
    )
}

#[tokio::test]
async fn test_paged_list_of_five_has_eight_pages() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::first(5).unwrap())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 8);
    assert_eq!(page.size, 5);
    assert_eq!(page.count, 40);
    assert!(page.has_next());
    assert!(!page.has_previous());
}

#[tokio::test]
async fn test_last_page_is_partial() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new().order_by(OrderBy::asc(|p: &TestProduct| p.id));
    let page = repo
        .get_list(spec, PageRequest::new(5, 7).unwrap())
        .await
        .unwrap();

    let ids: Vec<i64> = page.items.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![36, 37, 38, 39, 40]);
    assert_eq!(page.pages, 6);
    assert!(!page.has_next());
    assert!(page.has_previous());
}

#[tokio::test]
async fn test_page_past_the_end_is_empty() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::new(9, 5).unwrap())
        .await
        .unwrap();

    assert!(page.items.is_empty());
    assert_eq!(page.count, 20);
    assert_eq!(page.pages, 4);
}

#[tokio::test]
async fn test_fetch_all_returns_every_row() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::first(FETCH_ALL).unwrap())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 40);
    assert_eq!(page.pages, 1);
}

#[tokio::test]
async fn test_default_page_holds_twenty_rows() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let page = repo
        .get_list(QuerySpec::new(), PageRequest::default())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 20);
    assert_eq!(page.pages, 2);
}

#[tokio::test]
async fn test_predicate_restricts_page() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new().filter(|p: &TestProduct| p.category_id == 1);
    let page = repo.get_list(spec, PageRequest::default()).await.unwrap();

    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pages, 1);
    assert!(page.items.iter().all(|p| p.category_id == 1));
}

#[tokio::test]
async fn test_chained_filters_are_anded() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new()
        .filter(|p: &TestProduct| p.stock == 0)
        .filter(|p: &TestProduct| !p.in_stock);
    let page = repo.get_list(spec, PageRequest::default()).await.unwrap();

    assert_eq!(page.items.len(), 5);
    assert!(page.items.iter().all(|p| p.category_id == 2));
}

#[test]
fn test_invalid_page_arguments() {
    assert_eq!(
        PageRequest::new(-1, 5).unwrap_err().kind,
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        PageRequest::new(0, 0).unwrap_err().kind,
        ErrorKind::InvalidArgument
    );
}

#[tokio::test]
async fn test_single_or_default() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let found = repo
        .single_or_default(QuerySpec::new().filter(|p: &TestProduct| p.id == 3))
        .await
        .unwrap();
    assert_eq!(found.map(|p| p.name), Some("Name3".to_string()));

    let missing = repo
        .single_or_default(QuerySpec::new().filter(|p: &TestProduct| p.id == 10001))
        .await
        .unwrap();
    assert!(missing.is_none());

    let err = repo
        .single_or_default(QuerySpec::new().filter(|p: &TestProduct| p.category_id == 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousResult);
}

#[tokio::test]
async fn test_first_or_default_ordered_with_category() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new()
        .order_by(OrderBy::asc(|p: &TestProduct| p.name.clone()))
        .include(with_category());
    let product = repo.first_or_default(spec).await.unwrap().unwrap();

    assert_eq!(product.name, "Name1");
    assert_eq!(product.category.map(|c| c.name), Some("Name1".to_string()));
}

#[tokio::test]
async fn test_descending_order_with_tie_breaker() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let spec = QuerySpec::new().order_by(
        OrderBy::desc(|p: &TestProduct| p.category_id).then_asc(|p: &TestProduct| p.id),
    );
    let rows = repo.get_all(spec).await.unwrap();

    let ids: Vec<i64> = rows.iter().take(3).map(|p| p.id).collect();
    assert_eq!(ids, vec![11, 12, 13]);
    assert_eq!(rows.last().map(|p| p.id), Some(5));
}

#[tokio::test]
async fn test_get_by_key() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    assert_eq!(repo.get(&1).await.unwrap().map(|p| p.id), Some(1));
    assert!(repo.get(&999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_counts() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestProduct>();

    assert_eq!(repo.count().await.unwrap(), 40);
    let in_third = Predicate::new(|p: &TestProduct| p.category_id == 3);
    assert_eq!(repo.count_where(in_third).await.unwrap(), 30);
}

#[tokio::test]
async fn test_get_field_projects_first_match() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let name = repo
        .get_field(Predicate::new(|p: &TestProduct| p.id == 3), |p: &TestProduct| {
            p.name.clone()
        })
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("Name3"));

    let none = repo
        .get_field(Predicate::new(|p: &TestProduct| p.id == 0), |p: &TestProduct| {
            p.stock
        })
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_get_all_and_selected_list() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    assert_eq!(repo.get_all(QuerySpec::new()).await.unwrap().len(), 20);

    let page = repo
        .get_list_selected(
            QuerySpec::new(),
            |p: &TestProduct| (p.name.clone(), p.stock),
            PageRequest::all(),
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 20);
    assert_eq!(page.items[0], ("Name1".to_string(), 300));
}

#[tokio::test]
async fn test_collection_include() {
    let (_store, mut uow) = helpers::memory_uow(40);
    let repo = uow.repository::<TestCategory>();

    let spec = QuerySpec::new()
        .filter(|c: &TestCategory| c.id <= 4)
        .order_by(OrderBy::asc(|c: &TestCategory| c.id))
        .include(with_products());
    let categories = repo.get_all(spec).await.unwrap();

    let sizes: Vec<usize> = categories.iter().map(|c| c.products.len()).collect();
    assert_eq!(sizes, vec![5, 5, 30, 0]);
}

#[tokio::test]
async fn test_global_filter_hides_rows() {
    let (_store, mut uow) = helpers::memory_uow_in_stock_only(40);
    let repo = uow.repository::<TestProduct>();

    assert_eq!(repo.count().await.unwrap(), 35);
    let out_of_stock = Predicate::new(|p: &TestProduct| p.category_id == 2);
    assert_eq!(repo.count_where(out_of_stock).await.unwrap(), 0);

    let spec = QuerySpec::new().filter(|p: &TestProduct| p.category_id == 2);
    let hidden = repo.get_list(spec.clone(), PageRequest::default()).await.unwrap();
    assert!(hidden.items.is_empty());
    assert_eq!(hidden.pages, 0);

    let bypassed = repo
        .get_list(spec.ignore_query_filters(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bypassed.items.len(), 5);
}

#[tokio::test]
async fn test_get_by_key_ignores_global_filter() {
    let (_store, mut uow) = helpers::memory_uow_in_stock_only(20);
    let repo = uow.repository::<TestProduct>();

    let product = repo.get(&6).await.unwrap().unwrap();
    assert!(!product.in_stock);
}

#[tokio::test]
async fn test_cancelled_list_never_runs() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let token = CancellationToken::new();
    token.cancel();
    let err = repo
        .get_list_cancellable(QuerySpec::new(), PageRequest::default(), &token)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);

    let live = CancellationToken::new();
    let page = repo
        .get_list_selected_cancellable(
            QuerySpec::new(),
            |p: &TestProduct| p.id,
            PageRequest::first(3).unwrap(),
            &live,
        )
        .await
        .unwrap();
    assert_eq!(page.items, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_raw_sql_is_not_supported() {
    let (_store, mut uow) = helpers::memory_uow(20);
    let repo = uow.repository::<TestProduct>();

    let query = repo.get_sql("SELECT * FROM test_products", Vec::new());
    let err = repo.fetch_query(&query).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotSupported);
}
