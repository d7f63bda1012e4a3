use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use voxcel_core::{ArraySpec, CellKey, Engine, Size3};

fn chain_engine(length: u32) -> Engine {
    let mut engine = Engine::new();
    engine
        .create_array(ArraySpec::named("bench").with_size(Size3::new(length + 1, 1, 1)))
        .expect("array");
    engine.set_cell(CellKey::at(1, 0, 0, 0), 1.0, None).expect("seed");
    for x in 1..=length {
        engine
            .enter(CellKey::at(1, x, 0, 0), &format!("=@[{},1,1,1]+1", x))
            .expect("formula");
    }
    engine
}

fn fan_out_engine(width: u32) -> Engine {
    let mut engine = Engine::new();
    engine
        .create_array(ArraySpec::named("bench").with_size(Size3::new(2, width, 1)))
        .expect("array");
    for y in 0..width {
        engine
            .enter(CellKey::at(1, 1, y, 0), "=MUL(A1, 2)")
            .expect("formula");
    }
    engine
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for length in [10u32, 100, 500] {
        let mut engine = chain_engine(length);
        let mut seed = 0.0;
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, _| {
            b.iter(|| {
                seed += 1.0;
                engine
                    .set_cell(CellKey::at(1, 0, 0, 0), black_box(seed), None)
                    .expect("edit")
            })
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10u32, 100, 1000] {
        let mut engine = fan_out_engine(width);
        let mut seed = 0.0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                seed += 1.0;
                engine
                    .set_cell(CellKey::at(1, 0, 0, 0), black_box(seed), None)
                    .expect("edit")
            })
        });
    }
    group.finish();
}

fn bench_emission(c: &mut Criterion) {
    let mut group = c.benchmark_group("emission");
    group.bench_function("fill_8x8", |b| {
        let mut engine = Engine::new();
        engine
            .create_array(ArraySpec::named("bench").with_size(Size3::new(8, 8, 1)))
            .expect("array");
        let anchor = CellKey::at(1, 0, 0, 0);
        let mut n = 0u32;
        b.iter(|| {
            n += 1;
            engine
                .enter(anchor, black_box(&format!("=ARRAY(\"fill\", 8, 8, 1, {n})")))
                .expect("fill")
        })
    });
    group.finish();
}

fn bench_undo_redo(c: &mut Criterion) {
    let mut engine = chain_engine(100);
    engine.set_cell(CellKey::at(1, 0, 0, 0), 2.0, None).expect("edit");
    c.bench_function("undo_redo_chain_100", |b| {
        b.iter(|| {
            engine.undo();
            engine.redo();
        })
    });
}

criterion_group!(
    benches,
    bench_chain,
    bench_fan_out,
    bench_emission,
    bench_undo_redo
);
criterion_main!(benches);
