// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for the DocBridge translator

use bson::doc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use docbridge_query::{compile, fingerprint, plan, AggregateFunction, Query, QueryPlan, TranslatorConfig};
use docbridge_storage::{Collection, InMemoryCollection};

fn chained_plan(clauses: usize) -> QueryPlan {
    (0..clauses).fold(QueryPlan::new(), |plan, i| {
        let column = format!("field_{}", i % 7);
        if i % 3 == 0 {
            plan.or_filter(column, ">=", i as i64)
        } else {
            plan.filter(column, "=", format!("value-{}", i))
        }
    })
}

// ============================================================================
// Filter Compilation
// ============================================================================

fn bench_compile(c: &mut Criterion) {
    let config = TranslatorConfig::default();
    let mut group = c.benchmark_group("compile");

    for clauses in [1usize, 8, 64].iter() {
        let plan = chained_plan(*clauses);
        group.throughput(Throughput::Elements(*clauses as u64));
        group.bench_with_input(BenchmarkId::new("chain", clauses), clauses, |b, _| {
            b.iter(|| black_box(compile(&plan.clauses, &config).unwrap()))
        });
    }

    let nested = QueryPlan::new()
        .filter("status", "=", "active")
        .filter_nested(|q| q.filter("name", "like", "%ada%").or_filter("email", "regex", "/@example\\.org$/i"))
        .filter_between("age", 18, 65)
        .filter_in("_id", vec!["507f1f77bcf86cd799439011", "507f191e810c19729de860ea"]);
    group.bench_function("mixed", |b| {
        b.iter(|| black_box(compile(&nested.clauses, &config).unwrap()))
    });

    group.finish();
}

// ============================================================================
// Planning and Fingerprints
// ============================================================================

fn bench_plan(c: &mut Criterion) {
    let config = TranslatorConfig::default();
    let mut group = c.benchmark_group("planner");

    let find = chained_plan(8).select(["a", "b"]).order_by("a", "desc").for_page(3, 25);
    group.bench_function("find", |b| b.iter(|| black_box(plan(&find, &config).unwrap())));

    let grouped = chained_plan(8)
        .group_by(["team", "region"])
        .aggregate(AggregateFunction::Sum, ["orders.*.total"])
        .order_by("team", "asc")
        .limit(50);
    group.bench_function("aggregate", |b| {
        b.iter(|| black_box(plan(&grouped, &config).unwrap()))
    });

    group.bench_function("fingerprint", |b| {
        b.iter(|| black_box(fingerprint("bench.items", &grouped).unwrap()))
    });

    group.finish();
}

// ============================================================================
// End-to-end against the in-memory collection
// ============================================================================

fn bench_execute(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let coll = InMemoryCollection::named("bench");
    rt.block_on(async {
        let docs = (0..1000)
            .map(|i| doc! { "n": i, "team": format!("t{}", i % 10), "score": i % 97 })
            .collect();
        coll.insert_many(docs).await.unwrap();
    });

    let mut group = c.benchmark_group("execute");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("get", |b| {
        b.to_async(&rt).iter(|| async {
            let rows = Query::new(&coll)
                .filter("score", ">", 50)
                .order_by("n", "desc")
                .limit(20)
                .get()
                .await
                .unwrap();
            black_box(rows)
        });
    });

    group.bench_function("group_sum", |b| {
        b.to_async(&rt).iter(|| async {
            let rows = Query::new(&coll)
                .group_by(["team"])
                .scope(|p| p.aggregate(AggregateFunction::Sum, ["score"]))
                .get()
                .await
                .unwrap();
            black_box(rows)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_plan, bench_execute);
criterion_main!(benches);
