use alice_sim::game;
use alice_sim::{PlayerInput, SimConfig, Simulator, TickInput};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn session(players: u8, workers: usize) -> Simulator {
    let config = SimConfig {
        players,
        skip_pregame: true,
        worker_threads: workers,
        ..game::demo_config()
    };
    game::simulator(config, game::demo_assets()).unwrap()
}

fn feed(sim: &mut Simulator, players: u8) {
    let tick = sim.tick() + 1;
    for p in 0..players {
        let buttons = if (tick / 30 + u64::from(p)) % 2 == 0 {
            PlayerInput::RIGHT
        } else {
            PlayerInput::LEFT
        };
        sim.add_input(p, tick, TickInput::new(PlayerInput::new(buttons)))
            .unwrap();
    }
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for players in [1u8, 4, 10] {
        group.bench_with_input(BenchmarkId::new("players", players), &players, |b, &n| {
            let mut sim = session(n, 0);
            b.iter(|| {
                feed(&mut sim, n);
                sim.advance().unwrap();
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    let mut sim = session(10, 0);
    for _ in 0..300 {
        feed(&mut sim, 10);
        sim.advance().unwrap();
    }
    let frame = sim.frame();

    group.bench_function("clone", |b| b.iter(|| black_box(frame.clone())));
    group.bench_function("serialize", |b| {
        b.iter(|| black_box(frame.serialize().unwrap()))
    });
    group.bench_function("checksum", |b| b.iter(|| black_box(frame.checksum().unwrap())));

    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollback");

    // Player 1 lags eight ticks behind, then its real input differs
    group.bench_function("resimulate_8", |b| {
        b.iter_batched(
            || {
                let mut sim = session(2, 0);
                for tick in 1..=60 {
                    sim.add_input(0, tick, TickInput::default()).unwrap();
                    if tick <= 52 {
                        sim.add_input(1, tick, TickInput::default()).unwrap();
                    }
                    sim.advance().unwrap();
                }
                sim
            },
            |mut sim| {
                let late = TickInput::new(PlayerInput::new(PlayerInput::JUMP));
                sim.add_input(1, 53, late).unwrap();
                black_box(sim.tick())
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_tick, bench_snapshot, bench_rollback);
criterion_main!(benches);
