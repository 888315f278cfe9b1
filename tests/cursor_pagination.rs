//! Scenario 2: cursor forward stability under concurrent insertion, plus the
//! cursor-monotonicity invariant from `spec.md §8`.

mod common;

use haven::{Cursor, QuerySpec};

#[tokio::test]
async fn forward_cursor_is_stable_across_insertion() {
    let db = common::build_db(vec![common::items_descriptor()]).await;
    let items = haven::CollectionHandle::new(db, "items");

    for i in 1..=10 {
        let mut data = common::field(&[]);
        data.insert("id".into(), common::text(&format!("item-{i:03}")));
        items.create(data).await.unwrap();
    }

    let cursor = Cursor {
        key: "id".into(),
        limit: 3,
        after: None,
        before: None,
    };
    let first_page = items.find_cursor(&cursor, &QuerySpec::new()).unwrap();
    let first_ids: Vec<String> = first_page
        .items
        .iter()
        .map(|i| i.get("id").unwrap().as_text().unwrap().to_string())
        .collect();
    assert_eq!(first_ids, vec!["item-001", "item-002", "item-003"]);

    let mut inserted = common::field(&[]);
    inserted.insert("id".into(), common::text("item-002a"));
    items.create(inserted).await.unwrap();

    let next_cursor = Cursor {
        key: "id".into(),
        limit: 3,
        after: Some("item-003".into()),
        before: None,
    };
    let second_page = items.find_cursor(&next_cursor, &QuerySpec::new()).unwrap();
    let second_ids: Vec<String> = second_page
        .items
        .iter()
        .map(|i| i.get("id").unwrap().as_text().unwrap().to_string())
        .collect();
    assert_eq!(second_ids, vec!["item-004", "item-005", "item-006"]);
    assert!(second_page.page_info.has_next_page);
    assert!(second_page.page_info.has_previous_page);
}

#[tokio::test]
async fn paginating_forward_to_exhaustion_covers_every_entity_once() {
    let db = common::build_db(vec![common::items_descriptor()]).await;
    let items = haven::CollectionHandle::new(db, "items");
    for i in 1..=11 {
        let mut data = common::field(&[]);
        data.insert("id".into(), common::text(&format!("item-{i:03}")));
        items.create(data).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let cursor = Cursor {
            key: "id".into(),
            limit: 4,
            after: after.clone(),
            before: None,
        };
        let page = items.find_cursor(&cursor, &QuerySpec::new()).unwrap();
        if page.items.is_empty() {
            break;
        }
        for entity in &page.items {
            seen.push(entity.get("id").unwrap().as_text().unwrap().to_string());
        }
        if !page.page_info.has_next_page {
            break;
        }
        after = page.page_info.end_cursor;
    }

    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), seen.len(), "every entity appears at most once");
    assert_eq!(seen.len(), 11, "every entity appears at least once");
}

#[tokio::test]
async fn empty_result_page_reports_no_cursors() {
    let db = common::build_db(vec![common::items_descriptor()]).await;
    let items = haven::CollectionHandle::new(db, "items");

    let cursor = Cursor {
        key: "id".into(),
        limit: 3,
        after: None,
        before: None,
    };
    let page = items.find_cursor(&cursor, &QuerySpec::new()).unwrap();
    assert!(page.items.is_empty());
    assert!(!page.page_info.has_next_page);
    assert!(!page.page_info.has_previous_page);
    assert!(page.page_info.start_cursor.is_none());
    assert!(page.page_info.end_cursor.is_none());
}
