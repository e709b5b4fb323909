//! Performance benchmarks for the document store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docstore::{
    evaluate, find_all, optimize, parse, where_, FindingRecords, Location, MemoryRepository,
    ParamBinds, Record, Repository, SortField, UpdateRecords, Value,
};

fn person(i: usize) -> Record<Value> {
    Record::new(
        format!("p{i:06}"),
        "people",
        Value::map([
            ("Name", Value::from(format!("person {i}"))),
            ("Age", Value::from((i % 90) as i64)),
            ("City", Value::from(if i % 3 == 0 { "Oslo" } else { "Lima" })),
        ]),
    )
}

fn age_range() -> ParamBinds {
    let mut params = ParamBinds::new();
    params.insert("age".into(), Value::from(20));
    params.insert("maxAge".into(), Value::from(40));
    params
}

/// Benchmark parsing and optimizing predicate text
fn bench_predicate_parse(c: &mut Criterion) {
    let text =
        "Data.Age > :age AND Data.Age < :maxAge AND NOT (Data.City = \"Oslo\" OR Data.Name = \"x\")";
    c.bench_function("predicate_parse", |b| {
        b.iter(|| black_box(optimize(&parse(black_box(text)).unwrap())));
    });
}

/// Benchmark in-process evaluation over a single document
fn bench_predicate_eval(c: &mut Criterion) {
    let predicate =
        parse("Data.Age > :age AND Data.Age < :maxAge AND Data.City = \"Lima\"").unwrap();
    let params = age_range();
    let document = person(31).to_document();
    c.bench_function("predicate_eval", |b| {
        b.iter(|| black_box(evaluate(&predicate, black_box(&document), &params)));
    });
}

/// Benchmark a filtered, sorted scan paged to exhaustion
fn bench_memory_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_find");

    for size in [1_000, 10_000] {
        let repo = MemoryRepository::new();
        repo.update_records(UpdateRecords::save((0..size).map(person).collect()))
            .unwrap();

        for limit in [0, 100] {
            group.bench_with_input(
                BenchmarkId::new(format!("records_{size}"), limit),
                &limit,
                |b, &limit| {
                    let filter =
                        where_("Data.Age > :age AND Data.Age < :maxAge", age_range()).unwrap();
                    let query = FindingRecords::of_type("people")
                        .filter(filter)
                        .sort_by(SortField::desc(Location::fields(["Data", "Age"])))
                        .limit(limit);
                    b.iter(|| black_box(find_all(&repo, query.clone()).unwrap()));
                },
            );
        }
    }

    group.finish();
}

/// Benchmark a create followed by a delete of the same record
fn bench_create_delete(c: &mut Criterion) {
    let repo = MemoryRepository::new();
    c.bench_function("create_delete", |b| {
        b.iter(|| {
            black_box(repo.update_records(UpdateRecords::save(vec![person(0)])).unwrap());
            black_box(repo.update_records(UpdateRecords::delete(vec![person(0)])).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_predicate_parse,
    bench_predicate_eval,
    bench_memory_find,
    bench_create_delete,
);

criterion_main!(benches);
