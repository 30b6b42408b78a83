use crossbeam_utils::thread::scope;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{mpsc, Barrier};
use std::time::{Duration, Instant};

use crate::config::{Config, Perf};
use crate::table::Table;

/// Generates the shared key set up front; workers only ever read it.
pub fn generate_keys(config: &Config) -> Vec<u64> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..config.num_keys)
        .map(|_| config.key_dist.sample(&mut rng))
        .collect()
}

/// Key-set indices owned by worker `tid`: tid, tid + W, tid + 2W, ...
///
/// The stride partition is fixed rather than work-stealing so the load
/// distribution is reproducible across runs and schedulers.
#[inline]
fn partition(tid: usize, threads: usize, num_keys: usize) -> impl Iterator<Item = usize> {
    (tid..num_keys).step_by(threads)
}

/// Runs the put phase, then the get phase, with a full join between them.
/// All inserts happen-before every lookup; the scope joins are the phase
/// barrier, the bucket locks only serialize access within a phase.
pub fn run(config: &Config) -> Perf {
    let table = &Table::with_buckets(config.buckets);
    let keys = &generate_keys(config);

    let insert_time = put_phase(config, table, keys);
    println!(
        "[main] Inserted {} keys in {:.6} seconds",
        keys.len(),
        insert_time.as_secs_f64()
    );

    let (lost, get_time) = get_phase(config, table, keys);
    let found = keys.len() - lost as usize;
    println!(
        "[main] Retrieved {}/{} keys in {:.6} seconds",
        found,
        keys.len(),
        get_time.as_secs_f64()
    );

    Perf {
        total_keys: keys.len(),
        found,
        lost,
        insert_time,
        get_time,
    }
}

fn put_phase(config: &Config, table: &Table, keys: &[u64]) -> Duration {
    let barrier = &Barrier::new(config.threads);
    let start = Instant::now();
    scope(|s| {
        for tid in 0..config.threads {
            s.spawn(move |_| {
                barrier.wait();
                for i in partition(tid, config.threads, keys.len()) {
                    table.insert(keys[i], tid as u64);
                }
            });
        }
    })
    .unwrap();
    start.elapsed()
}

fn get_phase(config: &Config, table: &Table, keys: &[u64]) -> (u64, Duration) {
    let barrier = &Barrier::new(config.threads);
    let (lost_sender, lost_receiver) = mpsc::channel();
    let start = Instant::now();
    scope(|s| {
        for tid in 0..config.threads {
            let lost_sender = lost_sender.clone();
            s.spawn(move |_| {
                barrier.wait();
                let mut lost: u64 = 0;
                for i in partition(tid, config.threads, keys.len()) {
                    if table.get(keys[i]).is_none() {
                        lost += 1;
                    }
                }
                println!("[worker {}] {} keys lost", tid, lost);
                lost_sender.send(lost).unwrap();
            });
        }
    })
    .unwrap();
    let elapsed = start.elapsed();

    let mut total_lost = 0;
    for _ in 0..config.threads {
        total_lost += lost_receiver.recv().unwrap();
    }
    (total_lost, elapsed)
}

#[cfg(test)]
mod tests {
    use super::{generate_keys, partition, run};
    use crate::config::Config;
    use rand::distributions::Uniform;

    fn test_config(threads: usize, num_keys: usize, buckets: usize, key_range: u64) -> Config {
        Config {
            threads,
            num_keys,
            buckets,
            key_range,
            key_dist: Uniform::from(0..key_range),
            seed: Some(42),
        }
    }

    #[test]
    fn partition_covers_every_index_exactly_once() {
        for &(num_keys, threads) in &[(100, 1), (100, 4), (101, 4), (3, 8), (0, 2)] {
            let mut indices: Vec<usize> = (0..threads)
                .flat_map(|tid| partition(tid, threads, num_keys))
                .collect();
            indices.sort_unstable();
            assert_eq!(indices, (0..num_keys).collect::<Vec<_>>());
        }
    }

    #[test]
    fn seeded_key_sets_are_reproducible() {
        let config = test_config(1, 1000, 5, 1 << 20);
        let keys = generate_keys(&config);
        assert_eq!(keys.len(), 1000);
        assert!(keys.iter().all(|&k| k < 1 << 20));
        assert_eq!(keys, generate_keys(&config));
    }

    #[test]
    fn no_keys_are_lost_single_threaded() {
        let perf = run(&test_config(1, 10_000, 5, 1 << 20));
        assert_eq!(perf.lost, 0);
        assert_eq!(perf.found, perf.total_keys);
    }

    #[test]
    fn no_keys_are_lost_multi_threaded() {
        let perf = run(&test_config(4, 10_000, 5, 1 << 20));
        assert_eq!(perf.lost, 0);
        assert_eq!(perf.found + perf.lost as usize, 10_000);
    }

    #[test]
    fn duplicate_heavy_key_set_loses_nothing() {
        // A range of 100 forces many duplicate keys; each duplicate is a
        // separate chain entry and every lookup still hits.
        let perf = run(&test_config(4, 5_000, 5, 100));
        assert_eq!(perf.lost, 0);
        assert_eq!(perf.found, 5_000);
    }

    #[test]
    fn more_workers_than_keys() {
        let perf = run(&test_config(8, 3, 5, 1 << 20));
        assert_eq!(perf.lost, 0);
        assert_eq!(perf.found, 3);
    }
}
