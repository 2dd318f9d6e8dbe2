use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferro_cache::{Cache, CacheBuilder, LoadingCache};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const CAPACITY: u64 = 10_000;
const NUM_ITEMS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
enum Op {
  GetHit,
  GetMiss,
  Put,
  Load,
}

impl Op {
  fn name(self) -> &'static str {
    match self {
      Op::GetHit => "GetHit",
      Op::GetMiss => "GetMiss",
      Op::Put => "Put",
      Op::Load => "Load",
    }
  }
}

/// Spreads `keys` over `threads` in a fixed, scrambled order.
fn keys_by_thread(keys: impl Iterator<Item = u64>, threads: usize) -> Vec<Vec<u64>> {
  let mut keys: Vec<u64> = keys.collect();
  keys.sort_by_key(|k| k.wrapping_mul(0x9E37_79B9_7F4A_7C15));
  let mut out = vec![Vec::new(); threads];
  for (i, key) in keys.into_iter().enumerate() {
    out[i % threads].push(key);
  }
  out
}

fn populated_cache() -> Cache<u64, u64> {
  let cache = CacheBuilder::new().maximum_size(CAPACITY).build().unwrap();
  for i in 0..NUM_ITEMS as u64 {
    cache.put(i, i);
  }
  cache.clean_up();
  cache
}

fn loading_cache() -> LoadingCache<u64, u64> {
  CacheBuilder::new()
    .maximum_size(CAPACITY)
    .loader(|key: &u64| Ok(Some(*key)))
    .build_loading()
    .unwrap()
}

fn run(op: Op, threads: usize) -> Duration {
  let cache = populated_cache();
  let loading = loading_cache();
  let keys = match op {
    Op::GetHit => keys_by_thread(0..NUM_ITEMS as u64, threads),
    _ => keys_by_thread(NUM_ITEMS as u64..2 * NUM_ITEMS as u64, threads),
  };
  let barrier = Arc::new(Barrier::new(threads + 1));

  thread::scope(|s| {
    for thread_keys in &keys {
      let barrier = barrier.clone();
      let cache = &cache;
      let loading = &loading;
      s.spawn(move || {
        barrier.wait();
        for key in thread_keys {
          match op {
            Op::GetHit | Op::GetMiss => {
              black_box(cache.get_if_present(key));
            }
            Op::Put => cache.put(*key, *key),
            Op::Load => {
              black_box(loading.get(key).ok());
            }
          }
        }
      });
    }
    barrier.wait();
    let start = Instant::now();
    // Leaving the scope joins every worker.
    start
  })
  .elapsed()
}

fn sync_benches(c: &mut Criterion) {
  let mut group = c.benchmark_group("SyncBasicOps");
  group.throughput(Throughput::Elements(NUM_ITEMS as u64));
  for op in [Op::GetHit, Op::GetMiss, Op::Put, Op::Load] {
    for threads in [1, 4, 8] {
      group.bench_with_input(BenchmarkId::new(op.name(), threads), &threads, |b, &threads| {
        b.iter_custom(|iters| (0..iters).map(|_| run(op, threads)).sum());
      });
    }
  }
  group.finish();
}

criterion_group!(benches, sync_benches);
criterion_main!(benches);
