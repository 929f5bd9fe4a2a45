//! Pump and pipeline throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rowflow_core::{CancellationToken, RowPool, Value};
use rowflow_readers::MemoryRowSource;
use rowflow_stream::{channel, ChannelOptions, PipelineConfig, Pump, RowPipeline};
use rowflow_transforms::{record, TransformerOptions};

const ROWS: i64 = 10_000;

#[allow(dead_code)]
#[derive(Debug, Default)]
struct Trade {
    id: i64,
    symbol: String,
    price: f64,
    quantity: i32,
}

record!(Trade {
    id: i64,
    symbol: String,
    price: f64,
    quantity: i32,
});

fn trades() -> MemoryRowSource {
    MemoryRowSource::with_inferred_types(
        ["Id", "Symbol", "Price", "Quantity"],
        (0..ROWS)
            .map(|id| {
                vec![
                    Value::Int64(id),
                    Value::from("ACME"),
                    Value::Float64(10.0 + id as f64 / 100.0),
                    Value::Int32((id % 500) as i32),
                ]
            })
            .collect(),
    )
    .unwrap()
}

fn bench_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("pump");
    group.throughput(Throughput::Elements(ROWS as u64));

    for pooled in [false, true] {
        group.bench_with_input(BenchmarkId::new("rows_to_unbounded", pooled), &pooled, |b, &pooled| {
            let pool = RowPool::default();
            b.iter(|| {
                let (writer, reader) = channel(ChannelOptions::unbounded()).unwrap();
                let mut pump = Pump::new(trades()).unwrap();
                if pooled {
                    pump = pump.with_pool(pool.clone());
                }
                let report = pump.run_blocking(&writer, &CancellationToken::new());
                drop(writer);
                let drained = reader.blocking_iter().count();
                black_box((report.items_written, drained))
            })
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(ROWS as u64));

    for buffer_size in [16, 128, 1024] {
        let pipeline = RowPipeline::new(PipelineConfig {
            buffer_size,
            ..Default::default()
        })
        .unwrap();

        group.bench_with_input(BenchmarkId::new("records", buffer_size), &pipeline, |b, pipeline| {
            b.iter(|| {
                runtime.block_on(async {
                    let records = pipeline
                        .stream_records::<Trade, _>(trades(), &TransformerOptions::default(), CancellationToken::new())
                        .unwrap()
                        .collect()
                        .await
                        .unwrap();
                    black_box(records.len())
                })
            })
        });

        group.bench_with_input(BenchmarkId::new("rows", buffer_size), &pipeline, |b, pipeline| {
            b.iter(|| {
                runtime.block_on(async {
                    let rows = pipeline
                        .stream_rows(trades(), CancellationToken::new())
                        .unwrap()
                        .collect()
                        .await
                        .unwrap();
                    black_box(rows.len())
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pump, bench_pipeline);
criterion_main!(benches);
