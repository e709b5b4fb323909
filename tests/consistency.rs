//! Cross-backend consistency and pagination completeness.
//!
//! Every backend compiles the same predicate into its own filter language;
//! the result must agree with evaluating the predicate in process.

use docstore::predicate::{Bindable, Compare, Operator};
use docstore::repository::search::{MemoryIndex, SearchConfig};
use docstore::repository::table::{MemoryTable, TableConfig};
use docstore::{
    evaluate, find_all, FindingRecords, Location, MemoryRepository, ParamBinds, Predicate,
    Record, Repository, SearchRepository, SortField, TableRepository, UpdateRecords, Value,
    WherePredicates,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
struct Row {
    a: Option<i64>,
    b: Option<i64>,
    tag: &'static str,
    item: bool,
}

fn backends() -> Vec<(&'static str, Box<dyn Repository>)> {
    vec![
        ("memory", Box::new(MemoryRepository::new()) as Box<dyn Repository>),
        (
            "table",
            Box::new(TableRepository::new(
                MemoryTable::new(),
                TableConfig {
                    scan_page_size: 3,
                    ..TableConfig::default()
                },
            )) as Box<dyn Repository>,
        ),
        (
            "search",
            Box::new(SearchRepository::new(MemoryIndex::new(), SearchConfig::default()))
                as Box<dyn Repository>,
        ),
    ]
}

fn to_record(i: usize, row: &Row) -> Record<Value> {
    let mut fields = vec![("tag", Value::from(row.tag))];
    if let Some(a) = row.a {
        fields.push(("a", Value::from(a)));
    }
    if let Some(b) = row.b {
        fields.push(("b", Value::from(b)));
    }
    let record_type = if row.item { "items" } else { "other" };
    Record::new(format!("r{i:02}"), record_type, Value::map(fields))
}

fn row() -> impl Strategy<Value = Row> {
    (
        prop::option::of(0i64..5),
        prop::option::of(0i64..5),
        prop_oneof![Just("x"), Just("y")],
        prop::bool::weighted(0.8),
    )
        .prop_map(|(a, b, tag, item)| Row { a, b, tag, item })
}

fn operator() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Lt),
        Just(Operator::Gt),
        Just(Operator::Le),
        Just(Operator::Ge),
    ]
}

fn data(field: &str) -> Location {
    Location::fields(["Data", field])
}

fn leaf() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        (prop_oneof![Just("a"), Just("b")], operator(), 0usize..3)
            .prop_map(|(field, op, p)| Predicate::param(data(field), op, format!("p{p}"))),
        (operator(), prop_oneof![Just("x"), Just("y")])
            .prop_map(|(op, tag)| Predicate::literal(data("tag"), op, tag)),
        operator().prop_map(|op| Predicate::Compare(Compare {
            location: data("a"),
            operator: op,
            bind: Bindable::Relative(data("b")),
        })),
    ]
}

fn predicate() -> impl Strategy<Value = Predicate> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Predicate::And),
            prop::collection::vec(inner.clone(), 0..3).prop_map(Predicate::Or),
            inner.prop_map(Predicate::not),
        ]
    })
}

fn binds_for(predicate: &Predicate, values: &[i64; 3]) -> ParamBinds {
    predicate
        .bind_names()
        .into_iter()
        .map(|name| {
            let index: usize = name[1..].parse().unwrap();
            (name, Value::from(values[index]))
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backends_agree_with_evaluate(
        rows in prop::collection::vec(row(), 0..12),
        predicate in predicate(),
        values in prop::array::uniform3(0i64..5),
        limit in 0usize..4,
    ) {
        let records: Vec<Record<Value>> =
            rows.iter().enumerate().map(|(i, r)| to_record(i, r)).collect();
        let params = binds_for(&predicate, &values);

        let expected: BTreeSet<String> = records
            .iter()
            .filter(|r| r.record_type == "items")
            .filter(|r| evaluate(&predicate, &r.to_document(), &params))
            .map(|r| r.id.clone())
            .collect();

        let query = FindingRecords::of_type("items")
            .filter(WherePredicates::from_predicate(predicate.clone(), params).unwrap())
            .sort_by(SortField::asc(data("a")))
            .limit(limit);

        let mut reference: Option<Vec<String>> = None;
        for (name, repo) in backends() {
            if !records.is_empty() {
                repo.update_records(UpdateRecords::save(records.clone())).unwrap();
            }
            let found: Vec<String> = find_all(repo.as_ref(), query.clone())
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();

            let distinct: BTreeSet<String> = found.iter().cloned().collect();
            prop_assert_eq!(distinct.len(), found.len(), "{} returned duplicates", name);
            prop_assert_eq!(&distinct, &expected, "{} disagrees with evaluate", name);

            match &reference {
                Some(order) => prop_assert_eq!(&found, order, "{} sorted differently", name),
                None => reference = Some(found),
            }
        }
    }
}

#[test]
fn test_pagination_visits_every_record_once() {
    for (name, repo) in backends() {
        let records: Vec<Record<Value>> = (0..23)
            .map(|i| {
                Record::new(
                    format!("n{i:02}"),
                    "numbers",
                    Value::map([("bucket", Value::from(i % 4)), ("n", Value::from(i))]),
                )
            })
            .collect();
        repo.update_records(UpdateRecords::save(records)).unwrap();

        for limit in [1, 4, 7, 23, 50] {
            let mut query = FindingRecords::of_type("numbers")
                .sort_by(SortField::desc(data("bucket")))
                .sort_by(SortField::asc(data("n")))
                .limit(limit);
            let mut seen = Vec::new();
            let mut pages = 0;
            loop {
                let page = repo.find_records(&query).unwrap();
                assert!(page.items.len() <= limit, "{name} limit {limit}");
                pages += 1;
                seen.extend(page.items.into_iter().map(|r| r.id));
                match page.next {
                    Some(next) => query = next,
                    None => break,
                }
            }
            assert_eq!(seen.len(), 23, "{name} limit {limit}");
            assert_eq!(pages, (23 + limit - 1) / limit, "{name} limit {limit}");
            assert_eq!(seen.first().map(String::as_str), Some("n03"), "{name}");
            assert_eq!(seen.last().map(String::as_str), Some("n20"), "{name}");
        }
    }
}

#[test]
fn test_tampered_cursor_is_rejected() {
    for (name, repo) in backends() {
        let records = (0..3)
            .map(|i| Record::new(format!("c{i}"), "cursor", Value::from(i)))
            .collect();
        repo.update_records(UpdateRecords::save(records)).unwrap();

        let page = repo
            .find_records(&FindingRecords::of_type("cursor").limit(1))
            .unwrap();
        let next = page.next.unwrap();
        let mut token = next.after.clone().unwrap();
        let flipped = if token.starts_with("00") { "11" } else { "00" };
        token.replace_range(0..2, flipped);

        let err = repo.find_records(&next.after(token)).unwrap_err();
        assert_eq!(err.kind(), docstore::ErrorKind::InvalidType, "{name}");
    }
}
