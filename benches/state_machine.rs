#![deny(warnings)]

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use failguard::{NoopInstrument, StateMachine};

fn consecutive_failures(c: &mut Criterion) {
    let mut state_machine = StateMachine::new("bench", 3, Duration::from_secs(5), NoopInstrument);
    let now = Instant::now();

    c.bench_function("consecutive_failures", |b| {
        b.iter(|| {
            let permit = black_box(state_machine.permit(now));
            state_machine.on_success(permit);
            let permit = black_box(state_machine.permit(now));
            state_machine.on_error(permit, now);
        })
    });
}

fn open_half_open_cycle(c: &mut Criterion) {
    let mut state_machine = StateMachine::new("bench", 1, Duration::from_secs(5), NoopInstrument);
    let mut now = Instant::now();

    c.bench_function("open_half_open_cycle", |b| {
        b.iter(|| {
            now += Duration::from_secs(5);
            let permit = black_box(state_machine.permit(now));
            state_machine.on_error(permit, now);
        })
    });
}

criterion_group!(benches, consecutive_failures, open_half_open_cycle);
criterion_main!(benches);
