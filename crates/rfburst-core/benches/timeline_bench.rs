//! Tick conversion and timeline planning benchmarks
//!
//! Run with: cargo bench -p rfburst-core --bench timeline_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rfburst_core::{
    ticks_to_time_ns, time_ns_to_ticks, BurstTimeline, DeviceConfig, OutcomeKind, SchedulingParams,
    StreamCode,
};

fn bench_tick_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_conversion");

    for rate in [100e6, 133.333333e6, 61.44e6].iter() {
        let ticks: Vec<i64> = (0..1024).map(|i| i * 13_333_333 + 7).collect();
        group.throughput(Throughput::Elements(ticks.len() as u64));

        group.bench_with_input(BenchmarkId::new("round_trip", rate), rate, |b, &rate| {
            b.iter(|| {
                ticks
                    .iter()
                    .map(|&t| time_ns_to_ticks(ticks_to_time_ns(black_box(t), rate), rate))
                    .sum::<i64>()
            })
        });
    }

    group.finish();
}

fn bench_timeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeline");

    let device = DeviceConfig::default();
    let params = SchedulingParams::default();

    group.bench_function("plan", |b| {
        b.iter(|| BurstTimeline::plan(black_box(1_234_567_890_123), &device, &params))
    });

    group.bench_function("with_buffer_sizes", |b| {
        b.iter(|| device.clone().with_buffer_sizes(black_box(&params)))
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let results = [Ok(83_333), Ok(1_000), Err(StreamCode::Overflow), Err(StreamCode::Timeout)];

    c.bench_function("classify_transfer", |b| {
        b.iter(|| {
            results
                .iter()
                .map(|r| OutcomeKind::classify(black_box(*r), 83_333, false).1)
                .sum::<i64>()
        })
    });
}

criterion_group!(benches, bench_tick_conversion, bench_timeline, bench_classify);
criterion_main!(benches);
