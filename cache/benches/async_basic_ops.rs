use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferro_cache::{AsyncCache, CacheBuilder};
use futures_util::future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Barrier;

const CAPACITY: u64 = 10_000;
const NUM_ITEMS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
enum Op {
  GetHit,
  Load,
  GetAll,
}

impl Op {
  fn name(self) -> &'static str {
    match self {
      Op::GetHit => "GetHit",
      Op::Load => "Load",
      Op::GetAll => "GetAll",
    }
  }
}

fn keys_by_task(keys: impl Iterator<Item = u64>, tasks: usize) -> Vec<Vec<u64>> {
  let mut keys: Vec<u64> = keys.collect();
  keys.sort_by_key(|k| k.wrapping_mul(0x9E37_79B9_7F4A_7C15));
  let mut out = vec![Vec::new(); tasks];
  for (i, key) in keys.into_iter().enumerate() {
    out[i % tasks].push(key);
  }
  out
}

async fn run(op: Op, tasks: usize) -> Duration {
  let cache: AsyncCache<u64, u64> = CacheBuilder::new()
    .maximum_size(CAPACITY)
    .async_loader(|key: u64| async move { Ok(Some(key)) })
    .async_bulk_loader(|keys: Vec<u64>| async move {
      Ok(keys.into_iter().map(|k| (k, k)).collect())
    })
    .build_async()
    .unwrap();
  for i in 0..NUM_ITEMS as u64 {
    cache.put(i, i);
  }
  cache.clean_up();

  let keys = match op {
    Op::GetHit => keys_by_task(0..NUM_ITEMS as u64, tasks),
    _ => keys_by_task(NUM_ITEMS as u64..2 * NUM_ITEMS as u64, tasks),
  };
  let barrier = Arc::new(Barrier::new(tasks + 1));
  let handles: Vec<_> = keys
    .into_iter()
    .map(|task_keys| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      tokio::spawn(async move {
        barrier.wait().await;
        match op {
          Op::GetHit | Op::Load => {
            for key in &task_keys {
              black_box(cache.get(key).await.ok());
            }
          }
          Op::GetAll => {
            for chunk in task_keys.chunks(64) {
              black_box(cache.get_all(chunk.iter().copied()).await.ok());
            }
          }
        }
      })
    })
    .collect();

  barrier.wait().await;
  let start = Instant::now();
  for joined in future::join_all(handles).await {
    joined.unwrap();
  }
  start.elapsed()
}

fn async_benches(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("AsyncBasicOps");
  group.throughput(Throughput::Elements(NUM_ITEMS as u64));
  for op in [Op::GetHit, Op::Load, Op::GetAll] {
    for tasks in [1, 4, 16] {
      group.bench_with_input(BenchmarkId::new(op.name(), tasks), &tasks, |b, &tasks| {
        b.iter_custom(|iters| {
          (0..iters)
            .map(|_| rt.block_on(run(op, tasks)))
            .sum()
        });
      });
    }
  }
  group.finish();
}

criterion_group!(benches, async_benches);
criterion_main!(benches);
