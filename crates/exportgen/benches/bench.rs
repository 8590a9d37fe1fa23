use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use exportgen::{
    ArchiveWriter, CHUNK_SIZE, ChunkSource, Compression, ExportPlan, GenerationRequest, Limits,
    MIB, PipelineOptions, fill, generate, write_export,
};
use std::time::Duration;
use tokio::runtime::Builder;

// Bytes pushed through the archive benchmarks per iteration.
const EXPORT_SIZE: u64 = 64 * MIB;

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("content");
    group.throughput(Throughput::Bytes(u64::from(CHUNK_SIZE)));

    group.bench_function("generate/1MiB", |b| {
        let mut id = 0_u64;
        b.iter(|| {
            id += 1;
            black_box(generate(id, CHUNK_SIZE))
        });
    });

    group.bench_function("fill/1MiB", |b| {
        let mut buf = Vec::with_capacity(CHUNK_SIZE as usize);
        let mut id = 0_u64;
        b.iter(|| {
            id += 1;
            fill(id, &mut buf, CHUNK_SIZE as usize);
            black_box(buf.len())
        });
    });

    group.finish();
}

fn bench_source(c: &mut Criterion) {
    let mut group = c.benchmark_group("source");
    group.throughput(Throughput::Bytes(EXPORT_SIZE));

    group.bench_function("drain/64MiB", |b| {
        b.iter(|| {
            let total: usize = ChunkSource::new(0, EXPORT_SIZE).map(|c| c.len()).sum();
            black_box(total)
        });
    });

    group.finish();
}

fn bench_archive(c: &mut Criterion, name: &str, compression: Compression) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let mut group = c.benchmark_group("archive");
    group.throughput(Throughput::Bytes(EXPORT_SIZE));
    group.sample_size(10);

    group.bench_function(format!("{name}/64MiB"), |b| {
        b.to_async(&rt).iter(|| async move {
            let mut writer = ArchiveWriter::new(tokio::io::sink(), compression);
            writer
                .append("bench.dat", Some(EXPORT_SIZE), ChunkSource::new(0, EXPORT_SIZE))
                .await
                .unwrap();
            black_box(writer.finish().await.unwrap())
        });
    });

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let request =
        GenerationRequest::new("bench", EXPORT_SIZE, Duration::ZERO, 0, &Limits::default())
            .unwrap();
    let plan = ExportPlan::new(request, 1024);
    let plan = &plan;

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(EXPORT_SIZE));
    group.sample_size(10);

    group.bench_function(format!("files/{}", plan.file_count()), |b| {
        b.to_async(&rt).iter(|| async move {
            let summary = write_export(plan, tokio::io::sink(), PipelineOptions::default())
                .await
                .unwrap();
            black_box(summary)
        });
    });

    group.finish();
}

fn bench_all(c: &mut Criterion) {
    bench_generate(c);
    bench_source(c);
    bench_archive(c, "stored", Compression::Stored);
    bench_archive(c, "deflate-fast", Compression::FAST);
    bench_pipeline(c);
}

criterion_group!(benches, bench_all);
criterion_main!(benches);
