use criterion::{criterion_group, criterion_main, Criterion};
use filtermate_engine::combine::optimize_duplicate_in_clauses;
use filtermate_engine::{CombineOperator, ProviderType, SubsetCombiner};
use std::hint::black_box;

const CHAIN_LENGTH: usize = 12;
const IN_LIST_LENGTH: usize = 2_000;

fn exists_clause(table: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM \"public\".\"{table}\" AS __source WHERE ST_Intersects(\"geom\", __source.\"geom\"))"
    )
}

fn in_list(offset: usize) -> String {
    let values = (offset..offset + IN_LIST_LENGTH)
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("\"id\" IN ({values})")
}

fn bench_exists_chain(c: &mut Criterion) {
    let combiner = SubsetCombiner::with_duplicate_optimizer();
    c.bench_function("combine_exists_chain", |b| {
        b.iter(|| {
            let mut subset = String::new();
            for index in 0..CHAIN_LENGTH {
                subset = combiner.combine(
                    &exists_clause(&format!("zones_{index}")),
                    Some(subset.as_str()),
                    Some(CombineOperator::And),
                    ProviderType::Postgres,
                );
            }
            black_box(subset)
        })
    });
}

fn bench_in_list_intersection(c: &mut Criterion) {
    let combined = format!("( {} ) AND ( {} )", in_list(0), in_list(IN_LIST_LENGTH / 2));
    c.bench_function("optimize_duplicate_in_clauses", |b| {
        b.iter(|| black_box(optimize_duplicate_in_clauses(black_box(&combined))))
    });
}

criterion_group!(benches, bench_exists_chain, bench_in_list_intersection);
criterion_main!(benches);
