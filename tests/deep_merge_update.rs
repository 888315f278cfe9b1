//! Scenario 3: updating one nested field deep-merges instead of replacing
//! the whole `metadata` object.

mod common;

#[tokio::test]
async fn update_merges_nested_object_preserving_siblings() {
    let db = common::build_db(vec![common::notes_descriptor()]).await;
    let notes = haven::CollectionHandle::new(db, "notes");

    let metadata = haven::QueryValue::Record(common::field(&[
        ("views", common::num(150.0)),
        ("rating", common::num(5.0)),
        (
            "tags",
            haven::QueryValue::Seq(vec![common::text("classic"), common::text("epic")]),
        ),
    ]));
    let created = notes
        .create(common::field(&[("title", common::text("Dune")), ("metadata", metadata)]))
        .await
        .unwrap();
    let id = created.get("id").unwrap().as_text().unwrap().to_string();

    let patch = common::field(&[(
        "metadata",
        haven::QueryValue::Record(common::field(&[("views", common::num(500.0))])),
    )]);
    let updated = notes.update(&id, patch).await.unwrap();

    let metadata = updated.get("metadata").unwrap().as_record().unwrap();
    assert_eq!(metadata.get("views").unwrap().as_number(), Some(500.0));
    assert_eq!(metadata.get("rating").unwrap().as_number(), Some(5.0));
    assert_eq!(
        metadata.get("tags").unwrap().as_seq().unwrap().len(),
        2,
        "sibling fields must survive a partial nested patch"
    );
}
