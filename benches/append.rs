use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use trajectory_writer::{InMemoryEngine, MemoryEngineConfig, Path, Record, Tensor, Trajectory, TrajectoryWriter};

fn make_writer() -> TrajectoryWriter<InMemoryEngine> {
    let config = MemoryEngineConfig::default().with_table("bench", 1 << 16);
    TrajectoryWriter::new(InMemoryEngine::new(&config).unwrap())
}

fn step(i: i64) -> Record {
    Record::map([
        ("observation", Record::value(Tensor::from(vec![0.0f32; 16]))),
        ("action", Record::value(i)),
        ("reward", Record::value(1.0f64)),
    ])
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("writer");
    group.throughput(Throughput::Elements(64));

    group.bench_function("append_full_step", |b| {
        // Fresh writer per sample so history growth does not leak between samples.
        b.iter_batched_ref(
            make_writer,
            |writer| {
                for i in 0..64 {
                    writer.append(step(i)).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("append_partial_then_close", |b| {
        b.iter_batched_ref(
            make_writer,
            |writer| {
                for i in 0..64 {
                    writer.append_partial(Record::fields([("observation", 0.5f64)])).unwrap();
                    writer.append(Record::fields([("action", i)])).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_create_item(c: &mut Criterion) {
    c.bench_function("writer/create_item_window_of_4", |b| {
        b.iter_batched_ref(
            || {
                let mut writer = make_writer();
                for i in 0..8 {
                    writer.append(step(i)).unwrap();
                }
                writer
            },
            |writer| {
                let trajectory = {
                    let history = writer.history().unwrap();
                    Trajectory::columns([
                        ("observation", history.column(&Path::from("observation")).unwrap().select(-4..).unwrap()),
                        ("action", history.column(&Path::from("action")).unwrap().select(-1).unwrap()),
                    ])
                };
                writer.create_item("bench", 1.0, trajectory).unwrap();
                writer.flush(0, Some(Duration::from_secs(1))).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_append, bench_create_item);
criterion_main!(benches);
