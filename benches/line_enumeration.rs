use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rank_mesh::topology::RankGrid;

fn bench_lines(c: &mut Criterion) {
    let grid = RankGrid::from_shape_vec(vec![8, 8, 8], (0..512).collect()).unwrap();
    let mut group = c.benchmark_group("line_enumeration");
    for dim in 0..3 {
        group.bench_function(format!("dim_{dim}"), |b| {
            b.iter(|| black_box(&grid).lines_along(dim).unwrap())
        });
    }
    group.finish();

    c.bench_function("coordinate_of_last_rank", |b| {
        b.iter(|| black_box(&grid).coordinate_of(511))
    });
}

criterion_group!(benches, bench_lines);
criterion_main!(benches);
