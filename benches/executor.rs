#![deny(warnings)]

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::stream::{self, StreamExt};
use tokio::runtime::Runtime;

use failguard::{CircuitBreaker, Executor, Failure, NoopInstrument, RetryPolicy};

fn multi_threaded_in_batch(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let circuit_breaker = CircuitBreaker::builder()
        .failure_threshold(u32::MAX)
        .instrument(NoopInstrument)
        .build("bench")
        .unwrap();
    let policy = RetryPolicy::builder()
        .max_attempts(2)
        .base_delay(Duration::ZERO)
        .build()
        .unwrap();
    let executor = Executor::new(policy, Duration::from_secs(1)).unwrap();
    let batch_size = 10;
    let executor = &executor;
    let circuit_breaker = &circuit_breaker;

    c.bench_function("executor_multi_threaded_in_batch", |b| {
        b.to_async(&runtime).iter(move || async move {
            let batch = (0..batch_size).map(|n| {
                executor.execute(circuit_breaker, move || dangerous_call(n))
            });

            let res: Vec<_> = stream::iter(batch)
                .buffer_unordered(batch_size)
                .collect()
                .await;
            let sum: usize = res
                .into_iter()
                .map(|res| res.unwrap_or_else(|err| err.into_inner().unwrap_or(0)))
                .sum();
            assert_eq!(45usize, sum);
        })
    });
}

async fn dangerous_call(n: usize) -> Result<usize, Failure<usize>> {
    if n % 5 == 0 {
        black_box(Err(Failure::retryable(n)))
    } else {
        black_box(Ok(n))
    }
}

criterion_group!(benches, multi_threaded_in_batch);
criterion_main!(benches);
