use std::sync::{Arc, OnceLock};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scoped_lazy::Lazy;

fn bench_fast_path(c: &mut Criterion) {
   let mut group = c.benchmark_group("fast_path");

   group.bench_function("scoped_lazy_get", |b| {
      let lazy: Lazy<u64> = Lazy::new(|| 42);
      lazy.get().unwrap();
      b.iter(|| black_box(lazy.get().unwrap()));
   });

   group.bench_function("std_once_lock_get_or_init", |b| {
      let cell = OnceLock::new();
      cell.get_or_init(|| 42u64);
      b.iter(|| black_box(cell.get_or_init(|| 42u64)));
   });

   group.finish();
}

fn bench_first_access(c: &mut Criterion) {
   const THREADS: usize = 8;

   c.bench_function("first_access_contended", |b| {
      b.iter(|| {
         let lazy = Arc::new(Lazy::new(|| (0..1_000u64).sum::<u64>()));
         thread::scope(|s| {
            for _ in 0..THREADS {
               let lazy = Arc::clone(&lazy);
               s.spawn(move || black_box(*lazy.get().unwrap()));
            }
         });
      });
   });
}

criterion_group!(benches, bench_fast_path, bench_first_access);
criterion_main!(benches);
