//! Scenario 4: hard-deleting an author with books is rejected and the
//! author is left untouched.

mod common;

use haven::DbError;

#[tokio::test]
async fn hard_delete_blocked_by_referencing_books() {
    let db = common::build_db(vec![common::authors_descriptor(), common::books_descriptor()]).await;
    let authors = haven::CollectionHandle::new(db.clone(), "authors");
    let books = haven::CollectionHandle::new(db, "books");

    let author = authors.create(common::field(&[("name", common::text("Ursula K. Le Guin"))])).await.unwrap();
    let author_id = author.get("id").unwrap().as_text().unwrap().to_string();

    books
        .create(common::field(&[
            ("title", common::text("LeftHand")),
            ("year", common::num(1969.0)),
            ("authorId", common::text(&author_id)),
        ]))
        .await
        .unwrap();

    let err = authors.delete(&author_id, false).await.unwrap_err();
    assert!(matches!(err, DbError::ForeignKey { .. }));

    let still_present = authors.find_by_id(&author_id).unwrap();
    assert!(still_present.is_some());
}

#[tokio::test]
async fn hard_delete_succeeds_once_referencing_books_are_gone() {
    let db = common::build_db(vec![common::authors_descriptor(), common::books_descriptor()]).await;
    let authors = haven::CollectionHandle::new(db.clone(), "authors");
    let books = haven::CollectionHandle::new(db, "books");

    let author = authors.create(common::field(&[("name", common::text("William Gibson"))])).await.unwrap();
    let author_id = author.get("id").unwrap().as_text().unwrap().to_string();

    let book = books
        .create(common::field(&[
            ("title", common::text("Neuromancer")),
            ("year", common::num(1984.0)),
            ("authorId", common::text(&author_id)),
        ]))
        .await
        .unwrap();
    let book_id = book.get("id").unwrap().as_text().unwrap().to_string();

    books.delete(&book_id, false).await.unwrap();
    authors.delete(&author_id, false).await.unwrap();
    assert!(authors.find_by_id(&author_id).unwrap().is_none());
}
