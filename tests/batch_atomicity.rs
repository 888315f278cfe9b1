//! Batch atomicity invariant (`spec.md §8`): if `createMany` fails outright
//! (no `skipDuplicates`), the collection's state is exactly the pre-call
//! state; `skipDuplicates` commits everything else and reports the rest.

mod common;

use haven::DbError;

#[tokio::test]
async fn create_many_without_skip_leaves_state_untouched_on_failure() {
    let db = common::build_db(vec![common::books_descriptor()]).await;

    db.create(
        "books",
        common::field(&[("title", common::text("Dune")), ("year", common::num(1965.0))]),
    )
    .await
    .unwrap();

    let batch = vec![
        common::field(&[("title", common::text("Neuromancer")), ("year", common::num(1984.0))]),
        common::field(&[("title", common::text("Dune")), ("year", common::num(1966.0))]),
    ];
    let err = db.create_many("books", batch, false).await.unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));

    let remaining = db.find("books", &haven::QuerySpec::new()).unwrap();
    assert_eq!(remaining.len(), 1, "the failed batch must not have committed anything");
}

#[tokio::test]
async fn create_many_with_skip_duplicates_commits_the_rest() {
    let db = common::build_db(vec![common::books_descriptor()]).await;

    db.create(
        "books",
        common::field(&[("title", common::text("Dune")), ("year", common::num(1965.0))]),
    )
    .await
    .unwrap();

    let batch = vec![
        common::field(&[("title", common::text("Neuromancer")), ("year", common::num(1984.0))]),
        common::field(&[("title", common::text("Dune")), ("year", common::num(1966.0))]),
        common::field(&[("title", common::text("SnowCrash")), ("year", common::num(1992.0))]),
    ];
    let summary = db.create_many("books", batch, true).await.unwrap();
    assert_eq!(summary.created.len(), 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].index, 1);

    let remaining = db.find("books", &haven::QuerySpec::new()).unwrap();
    assert_eq!(remaining.len(), 3);
}

#[tokio::test]
async fn update_many_failure_leaves_state_untouched() {
    let db = common::build_db(vec![common::books_descriptor()]).await;
    db.create(
        "books",
        common::field(&[("title", common::text("Dune")), ("year", common::num(1965.0))]),
    )
    .await
    .unwrap();
    db.create(
        "books",
        common::field(&[("title", common::text("Neuromancer")), ("year", common::num(1984.0))]),
    )
    .await
    .unwrap();

    let before = db.find("books", &haven::QuerySpec::new()).unwrap();

    let bad_patch = common::field(&[("year", common::text("not-a-number"))]);
    let err = db
        .update_many("books", |_| true, bad_patch, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation(_)));

    let after = db.find("books", &haven::QuerySpec::new()).unwrap();
    assert_eq!(before, after, "a rejected batch must not mutate any entity");
}
