//! Scenario 5: soft-delete semantics — the entity stays in state, is
//! omitted by default, and reappears with `includeSoftDeleted`; a repeat
//! soft-delete is idempotent.

mod common;

use haven::QuerySpec;

#[tokio::test]
async fn soft_deleted_entity_is_hidden_by_default_and_visible_on_request() {
    let db = common::build_db(vec![common::books_descriptor()]).await;
    let books = haven::CollectionHandle::new(db, "books");

    let created = books
        .create(common::field(&[("title", common::text("Dune")), ("year", common::num(1965.0))]))
        .await
        .unwrap();
    let id = created.get("id").unwrap().as_text().unwrap().to_string();
    assert!(created.get("deletedAt").map(|v| v.is_null()).unwrap_or(true));

    let deleted = books.delete(&id, true).await.unwrap();
    assert!(!deleted.get("deletedAt").unwrap().is_null());

    let default_results = books.find(&QuerySpec::new()).unwrap();
    assert!(default_results.is_empty());

    let including_deleted = books
        .find(&QuerySpec {
            include_soft_deleted: true,
            ..QuerySpec::new()
        })
        .unwrap();
    assert_eq!(including_deleted.len(), 1);
}

#[tokio::test]
async fn repeated_soft_delete_preserves_original_timestamp() {
    let db = common::build_db(vec![common::books_descriptor()]).await;
    let books = haven::CollectionHandle::new(db, "books");

    let created = books
        .create(common::field(&[("title", common::text("Dune")), ("year", common::num(1965.0))]))
        .await
        .unwrap();
    let id = created.get("id").unwrap().as_text().unwrap().to_string();

    let first_delete = books.delete(&id, true).await.unwrap();
    let first_deleted_at = first_delete.get("deletedAt").unwrap().clone();

    let second_delete = books.delete(&id, true).await.unwrap();
    let second_deleted_at = second_delete.get("deletedAt").unwrap().clone();

    assert_eq!(first_deleted_at, second_deleted_at);
}
