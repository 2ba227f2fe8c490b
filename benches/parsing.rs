//! Benchmarks for chatlens parsing and import operations.
//!
//! Run with: `cargo bench`
//! Run specific group: `cargo bench --bench parsing -- line`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chatlens::event::ParseOptions;
use chatlens::import::run_import;
use chatlens::parsers::{ChatLabParser, FormatParser, LineParser, QqParser};
use chatlens::progress::no_progress;
use chatlens::store::Store;

// =============================================================================
// Test Data Generators
// =============================================================================

fn generate_line_txt(count: usize) -> String {
    let mut out = String::from("[LINE] Chat history in BenchGroup\nSaved on: 2025/01/02 10:00\n\n");
    for day in 0..=(count / 1000) {
        out.push_str(&format!("2025/01/{:02} Friday\n", (day % 27) + 1));
        let in_day = if day == count / 1000 {
            count % 1000
        } else {
            1000
        };
        for i in 0..in_day {
            let sender = if i % 2 == 0 { "Alice" } else { "Bob" };
            out.push_str(&format!(
                "{:02}:{:02}\t{}\tmessage number {}\n",
                (i / 60) % 24,
                i % 60,
                sender,
                i
            ));
        }
    }
    out
}

fn generate_qq_txt(count: usize) -> String {
    let mut out = String::from(
        "消息分组:我的QQ群\n================================================================\n消息对象:BenchGroup\n================================================================\n\n",
    );
    for i in 0..count {
        let (sender, uin) = if i % 2 == 0 {
            ("Alice", 10001)
        } else {
            ("Bob", 10002)
        };
        out.push_str(&format!(
            "2023-05-01 {:02}:{:02}:{:02} {}({})\nmessage number {}\n\n",
            (i / 3600) % 24,
            (i / 60) % 60,
            i % 60,
            sender,
            uin,
            i
        ));
    }
    out
}

fn generate_chatlab_jsonl(count: usize) -> String {
    let mut out = String::from(
        "{\"type\": \"meta\", \"name\": \"BenchGroup\", \"platform\": \"chatlab\", \"chatType\": \"group\"}\n",
    );
    out.push_str("{\"type\": \"member\", \"platformId\": \"u1\", \"accountName\": \"Alice\"}\n");
    out.push_str("{\"type\": \"member\", \"platformId\": \"u2\", \"accountName\": \"Bob\"}\n");
    for i in 0..count {
        let sender = if i % 2 == 0 { "u1" } else { "u2" };
        out.push_str(&format!(
            "{{\"type\": \"message\", \"id\": \"m{i}\", \"senderId\": \"{sender}\", \"senderName\": \"S\", \"ts\": {}, \"kind\": \"text\", \"content\": \"message number {i}\"}}\n",
            1735814100 + i as i64 * 60,
        ));
    }
    out
}

fn drain_parser(parser: &dyn FormatParser, path: &std::path::Path) -> u64 {
    let options = ParseOptions::new().with_tz_offset_secs(0);
    let stream = parser.parse(path, &options).unwrap();
    let mut count = 0u64;
    for event in stream {
        if let chatlens::event::ParseEvent::Messages(batch) = event.unwrap() {
            count += batch.len() as u64;
        }
    }
    count
}

// =============================================================================
// Parsing Benchmarks
// =============================================================================

fn bench_line_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_parsing");
    let parser = LineParser::new();
    let dir = tempfile::tempdir().unwrap();

    for size in [100_usize, 1_000, 10_000] {
        let path = dir.path().join(format!("line_{size}.txt"));
        std::fs::write(&path, generate_line_txt(size)).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| drain_parser(black_box(&parser), path));
        });
    }
    group.finish();
}

fn bench_qq_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("qq_parsing");
    let parser = QqParser::new();
    let dir = tempfile::tempdir().unwrap();

    for size in [100_usize, 1_000, 10_000] {
        let path = dir.path().join(format!("qq_{size}.txt"));
        std::fs::write(&path, generate_qq_txt(size)).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| drain_parser(black_box(&parser), path));
        });
    }
    group.finish();
}

fn bench_chatlab_jsonl_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("chatlab_jsonl_parsing");
    let parser = ChatLabParser::new();
    let dir = tempfile::tempdir().unwrap();

    for size in [100_usize, 1_000, 10_000] {
        let path = dir.path().join(format!("chatlab_{size}.jsonl"));
        std::fs::write(&path, generate_chatlab_jsonl(size)).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| drain_parser(black_box(&parser), path));
        });
    }
    group.finish();
}

// =============================================================================
// Full Import Benchmark
// =============================================================================

fn bench_full_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_import");
    group.sample_size(10);
    let dir = tempfile::tempdir().unwrap();

    for size in [1_000_usize, 10_000] {
        let path = dir.path().join(format!("import_{size}.txt"));
        std::fs::write(&path, generate_line_txt(size)).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| {
                let mut store = Store::open_in_memory().unwrap();
                let options = ParseOptions::new().with_tz_offset_secs(0);
                run_import(&mut store, black_box(path), &options, &no_progress()).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_line_parsing,
    bench_qq_parsing,
    bench_chatlab_jsonl_parsing,
    bench_full_import
);
criterion_main!(benches);
