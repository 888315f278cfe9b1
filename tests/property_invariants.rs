//! Property-style invariants from `spec.md §8`: validation closure and FK
//! closure, checked across randomly generated inputs rather than fixed
//! examples.

mod common;

use proptest::prelude::*;

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    /// Validation closure: every entity a successful `create` returns has a
    /// `title` string and a `year` number, whatever the input values were.
    #[test]
    fn create_result_always_satisfies_the_schema(
        title in "[a-zA-Z0-9 ]{1,40}",
        year in -5000i32..5000i32,
    ) {
        let created = rt().block_on(async {
            let db = common::build_db(vec![common::books_descriptor()]).await;
            let books = haven::CollectionHandle::new(db, "books");
            books
                .create(common::field(&[
                    ("title", common::text(&title)),
                    ("year", common::num(year as f64)),
                ]))
                .await
                .unwrap()
        });
        prop_assert!(created.get("title").unwrap().as_text().is_some());
        prop_assert!(created.get("year").unwrap().as_number().is_some());
        prop_assert!(created.get("id").unwrap().as_text().is_some());
    }

    /// FK closure: a non-null `authorId` either resolves to a real author or
    /// the create is rejected; it is never silently stored unresolved.
    #[test]
    fn dangling_author_id_is_always_rejected(bogus_id in "[a-f0-9]{8}") {
        let result = rt().block_on(async {
            let db = common::build_db(vec![common::authors_descriptor(), common::books_descriptor()]).await;
            let books = haven::CollectionHandle::new(db, "books");
            books
                .create(common::field(&[
                    ("title", common::text("Some Title")),
                    ("year", common::num(2000.0)),
                    ("authorId", common::text(&bogus_id)),
                ]))
                .await
        });
        prop_assert!(matches!(result, Err(haven::DbError::ForeignKey { .. })), "expected ForeignKey error");
    }
}
