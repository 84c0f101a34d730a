use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recbase::core::database::Database;
use recbase::query::fex::FieldExpr;
use recbase::query::types::{QueryParams, RecordFilter};

/// Helper to build a typed database text with `count` records
fn create_library_text(count: usize) -> String {
    let mut rng = StdRng::seed_from_u64(42);
    let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    let mut text = String::from("%rec: Book\n%key: isbn\n%type: pages int\n%sort: title\n");
    for id in 0..count {
        let title: Vec<&str> = (0..4).map(|_| words[rng.gen_range(0..words.len())]).collect();
        text.push_str(&format!(
            "\nisbn: {}\ntitle: {}\npages: {}\ncategory: category_{}\n",
            id,
            title.join(" "),
            rng.gen_range(50..900),
            id % 10
        ));
    }
    text
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for count in [100, 1_000, 10_000] {
        let text = create_library_text(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &text, |b, text| {
            b.iter(|| Database::parse(black_box(text)).unwrap());
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let db = Database::parse(&create_library_text(10_000)).unwrap();
    let params = QueryParams::new()
        .with_type("Book")
        .select("pages > 400 && title ~ 'fox'")
        .unwrap();

    c.bench_function("select_10k", |b| {
        b.iter(|| db.query(black_box(&params)).unwrap());
    });
}

fn bench_sort_and_project(c: &mut Criterion) {
    let db = Database::parse(&create_library_text(10_000)).unwrap();
    let params = QueryParams::new()
        .sort_by(FieldExpr::compile("category,pages").unwrap())
        .with_fields(FieldExpr::compile("isbn,title").unwrap());

    c.bench_function("sort_project_10k", |b| {
        b.iter(|| db.query(black_box(&params)).unwrap());
    });
}

fn bench_fast_string(c: &mut Criterion) {
    let db = Database::parse(&create_library_text(10_000)).unwrap();
    let filter = RecordFilter::new().with_fast_string("lazy dog").case_insensitive(true);
    let params = QueryParams::new().with_filter(filter);

    c.bench_function("fast_string_10k", |b| {
        b.iter(|| db.query(black_box(&params)).unwrap());
    });
}

fn bench_serialize(c: &mut Criterion) {
    let db = Database::parse(&create_library_text(10_000)).unwrap();
    c.bench_function("serialize_10k", |b| {
        b.iter(|| black_box(db.to_text()));
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_selection,
    bench_sort_and_project,
    bench_fast_string,
    bench_serialize
);
criterion_main!(benches);
