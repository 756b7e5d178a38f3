#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Document backend integration tests.
//!
//! Requests are resolved and translated into Mongo-style filter and sort
//! documents.

use serde_json::json;
use strainer_kernel::filter::{FieldSet, FieldType, FilterResolver, QueryParams};
use strainer_kernel::sorting::{NullsPolicy, SortingResolver};
use strainer_kernel::translate::document::{Document, DocumentQuery};
use strainer_kernel::translate::{ApplyOptions, apply_filters, apply_filters_and_sorting};
use strainer_test_utils::user_columns;

fn resolver() -> FilterResolver {
    FilterResolver::new(
        FieldSet::builder()
            .columns(
                user_columns()
                    .into_iter()
                    .map(|(name, ty)| (name, ty.parse::<FieldType>().unwrap())),
            )
            .build()
            .unwrap(),
    )
}

fn collection() -> DocumentQuery {
    DocumentQuery::for_fields(user_columns().into_iter().map(|(name, _)| name))
}

#[test]
fn request_to_find_filter_and_sort() {
    let params = QueryParams::parse(
        "age[ge]=21&languages[contains]=en,de&email[is_null]=false&sort=-score",
    );
    let filters = resolver().resolve(&params).unwrap();
    let sorting = SortingResolver::builder()
        .field_with_nulls("score", NullsPolicy::Bigger)
        .build()
        .unwrap()
        .resolve(&params)
        .unwrap();

    let query =
        apply_filters_and_sorting(&Document, collection(), &filters, &sorting, &ApplyOptions::new())
            .unwrap();

    assert_eq!(
        query.to_filter(),
        json!({"$and": [
            {"email": {"$ne": null}},
            {"age": {"$gte": 21}},
            {"languages": {"$all": ["en", "de"]}},
        ]})
    );
    assert_eq!(query.sort_document(), json!([["score", -1]]));
}

#[test]
fn patterns_become_regexes() {
    let filters = resolver()
        .resolve_query("name[not_ilike]=a_b%25")
        .unwrap();
    let query = apply_filters(&Document, collection(), &filters, &ApplyOptions::new()).unwrap();
    assert_eq!(
        query.to_filter(),
        json!({"name": {"$not": {"$regex": "^a.b.*$", "$options": "i"}}})
    );
}

#[test]
fn timestamps_compare_as_strings() {
    let filters = resolver()
        .resolve_query("created_at[lt]=2024-03-01T12:00:00Z")
        .unwrap();
    let query = apply_filters(&Document, collection(), &filters, &ApplyOptions::new()).unwrap();
    let clause = &query.to_filter()["created_at"]["$lt"];
    assert!(clause.as_str().unwrap().starts_with("2024-03-01"), "{clause}");
}

#[test]
fn null_check_on_optional_collection() {
    let fields = FieldSet::builder()
        .add("tags", "list[str]?".parse().unwrap())
        .build()
        .unwrap();
    let filters = FilterResolver::new(fields)
        .resolve_query("tags[is_null]=true")
        .unwrap();
    let query = apply_filters(
        &Document,
        DocumentQuery::for_fields(["tags"]),
        &filters,
        &ApplyOptions::new(),
    )
    .unwrap();
    assert_eq!(query.to_filter(), json!({"tags": {"$eq": null}}));
}

#[test]
fn no_filters_match_everything() {
    let filters = resolver().resolve_query("").unwrap();
    let query = apply_filters(&Document, collection(), &filters, &ApplyOptions::new()).unwrap();
    assert_eq!(query.to_filter(), json!({}));
    assert!(query.conditions().is_empty());
}
