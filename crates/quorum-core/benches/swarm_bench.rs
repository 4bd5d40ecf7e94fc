use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use quorum_core::{HazardLayout, Swarm, SwarmConfig};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn bench_swarm_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("swarm_step");
    let samples: usize = env_or("QS_BENCH_SAMPLES", 30).max(10);
    group.sample_size(samples);
    group.warm_up_time(Duration::from_secs(env_or("QS_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("QS_BENCH_MEASURE_SECS", 10)));
    // Steps per bench iteration (override via QS_BENCH_STEPS)
    let steps: usize = env_or("QS_BENCH_STEPS", 256).max(1);
    let agents_list: Vec<usize> = std::env::var("QS_BENCH_AGENTS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![30_usize, 120, 480]);

    for &agents in &agents_list {
        for hazards in [HazardLayout::None, HazardLayout::Full] {
            group.bench_function(format!("steps{steps}_agents{agents}_{hazards:?}"), |b| {
                b.iter_batched(
                    || {
                        let mut config = SwarmConfig {
                            num_agents: agents,
                            rng_seed: 0xBEEF,
                            ..SwarmConfig::default()
                        };
                        config.layout.hazards = hazards;
                        Swarm::new(config).expect("swarm")
                    },
                    |mut swarm| {
                        for _ in 0..steps {
                            swarm.step();
                        }
                        swarm
                    },
                    BatchSize::LargeInput,
                );
            });
        }
    }
    group.finish();
}

fn bench_full_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("swarm_run");
    group.sample_size(env_or("QS_BENCH_RUN_SAMPLES", 10).max(10));
    let cap: u64 = env_or("QS_BENCH_RUN_CAP", 50_000);
    group.bench_function("reference_until_done", |b| {
        b.iter_batched(
            || Swarm::new(SwarmConfig::default()).expect("swarm"),
            |mut swarm| swarm.run_until_done(Some(cap)),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_swarm_steps, bench_full_runs);
criterion_main!(benches);
