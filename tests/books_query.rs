//! Scenario 1: filter + sort + select including computed fields.

mod common;

use haven::{FieldFilter, QuerySpec, QueryValue, Select, SortDir};

#[tokio::test]
async fn filters_sorts_and_projects_computed_fields() {
    let db = common::build_db(vec![common::books_descriptor()]).await;
    let books = haven::CollectionHandle::new(db, "books");

    let seeds = [
        ("Dune", 1965.0),
        ("Neuromancer", 1984.0),
        ("LeftHand", 1969.0),
        ("PHM", 2021.0),
        ("SnowCrash", 1992.0),
    ];
    for (title, year) in seeds {
        books
            .create(common::field(&[("title", common::text(title)), ("year", common::num(year))]))
            .await
            .unwrap();
    }

    let mut where_ = haven::WhereClause::new();
    where_.insert("isClassic".into(), FieldFilter::Eq(QueryValue::Bool(false)));

    let spec = QuerySpec {
        where_: Some(where_),
        sort: vec![("displayName".into(), SortDir::Asc)],
        select: Some(Select::Fields(vec!["title".into(), "displayName".into(), "isClassic".into()])),
        ..QuerySpec::new()
    };

    let results = books.find(&spec).unwrap();
    let titles: Vec<&str> = results
        .iter()
        .map(|r| r.get("title").unwrap().as_text().unwrap())
        .collect();
    assert_eq!(titles, vec!["Neuromancer", "PHM", "SnowCrash"]);

    for row in &results {
        let mut keys: Vec<&str> = row.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["displayName", "isClassic", "title"]);
        assert_eq!(row.get("isClassic").unwrap().as_bool(), Some(false));
    }
}
