//! Recomputation Benchmarks
//!
//! Long derived chains and wide fan-in forms with Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use formflow_core::{recompute, Field, FieldId, FieldKind};

fn id(name: String) -> FieldId {
    FieldId::new(name).expect("valid bench id")
}

/// `x0` is a number; `x{i}` = `x{i-1} + 1` for every following field
fn chain(len: usize) -> Vec<Field> {
    let mut fields = Vec::with_capacity(len);
    let mut seed = Field::new(id("x0".into()), FieldKind::Number, None);
    seed.set_value(1.0).expect("number value");
    fields.push(seed);

    for i in 1..len {
        let mut field = Field::new(id(format!("x{i}")), FieldKind::Derived, None);
        field
            .set_parent_field_ids(vec![id(format!("x{}", i - 1))])
            .expect("derived parents");
        field.set_formula(format!("x{} + 1", i - 1)).expect("derived formula");
        fields.push(field);
    }
    // reversed so the topological sort has real work to do
    fields.reverse();
    fields
}

/// `n` numbers summed by one derived field
fn fan_in(n: usize) -> Vec<Field> {
    let mut fields: Vec<Field> = (0..n)
        .map(|i| {
            let mut field = Field::new(id(format!("n{i}")), FieldKind::Number, None);
            field.set_value(i as f64).expect("number value");
            field
        })
        .collect();

    let parents: Vec<FieldId> = fields.iter().map(|f| f.id().clone()).collect();
    let formula = parents
        .iter()
        .map(FieldId::as_str)
        .collect::<Vec<_>>()
        .join(" + ");
    let mut total = Field::new(id("total".into()), FieldKind::Derived, None);
    total.set_parent_field_ids(parents).expect("derived parents");
    total.set_formula(formula).expect("derived formula");
    fields.push(total);
    fields
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute_chain");
    for len in [10, 100, 1_000] {
        let fields = chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &fields, |b, fields| {
            b.iter(|| recompute(black_box(fields)).changed())
        });
    }
    group.finish();
}

fn bench_no_op(c: &mut Criterion) {
    let fields = recompute(&chain(100)).into_fields();
    c.bench_function("recompute_unchanged_chain_100", |b| {
        b.iter(|| recompute(black_box(&fields)).changed())
    });
}

fn bench_fan_in(c: &mut Criterion) {
    let fields = fan_in(200);
    c.bench_function("recompute_fan_in_200", |b| {
        b.iter(|| recompute(black_box(&fields)).changed())
    });
}

criterion_group!(benches, bench_chain, bench_no_op, bench_fan_in);
criterion_main!(benches);
