use criterion::{criterion_group, criterion_main, Criterion};
use rtcore::{DictStorage, Value};
use std::time::{Duration, Instant};

fn add_cold(c: &mut Criterion) {
    c.bench_function("DictStorage: add, cold", |b| {
        b.iter_custom(|iters| {
            let storage: DictStorage<u64> = DictStorage::new();
            let start = Instant::now();
            for i in 0..iters {
                assert!(storage.add(Value::from(i as i64), i).is_ok());
            }
            start.elapsed()
        })
    });
}

fn add_warmed_up(c: &mut Criterion) {
    c.bench_function("DictStorage: add, warmed up", |b| {
        b.iter_custom(|iters| {
            let storage: DictStorage<u64> = DictStorage::with_capacity(iters as usize * 2);
            let start = Instant::now();
            for i in 0..iters {
                assert!(storage.add(Value::from(i as i64), i).is_ok());
            }
            start.elapsed()
        })
    });
}

fn read_str(c: &mut Criterion) {
    c.bench_function("DictStorage: read, str keys", |b| {
        b.iter_custom(|iters| {
            let keys: Vec<Value> = (0..iters).map(|i| Value::from(format!("key{i}"))).collect();
            let storage: DictStorage<u64> = DictStorage::with_capacity(iters as usize);
            for (i, key) in keys.iter().enumerate() {
                assert!(storage.add(key.clone(), i as u64).is_ok());
            }
            let start = Instant::now();
            for (i, key) in keys.iter().enumerate() {
                assert_eq!(storage.read(key, |_, v| *v == i as u64).ok().flatten(), Some(true));
            }
            start.elapsed()
        })
    });
}

fn read_mixed(c: &mut Criterion) {
    c.bench_function("DictStorage: read, mixed keys", |b| {
        b.iter_custom(|iters| {
            let keys: Vec<Value> = (0..iters)
                .map(|i| {
                    if i % 2 == 0 {
                        Value::from(i as i64)
                    } else {
                        Value::from(format!("key{i}"))
                    }
                })
                .collect();
            let storage: DictStorage<u64> = DictStorage::with_capacity(iters as usize);
            for (i, key) in keys.iter().enumerate() {
                assert!(storage.add(key.clone(), i as u64).is_ok());
            }
            let start = Instant::now();
            for (i, key) in keys.iter().enumerate() {
                assert_eq!(storage.try_get(key).ok().flatten(), Some(i as u64));
            }
            start.elapsed()
        })
    });
}

fn add_tail_latency(c: &mut Criterion) {
    c.bench_function("DictStorage: add_tail_latency", move |b| {
        b.iter_custom(|iters| {
            let mut duration = Duration::default();
            for _ in 0..iters {
                let storage: DictStorage<u64> = DictStorage::new();
                let mut max_duration = Duration::default();
                (0..65536_u64).for_each(|key| {
                    let start = Instant::now();
                    assert!(storage.add(Value::from(key as i64), key).is_ok());
                    let elapsed = start.elapsed();
                    if elapsed > max_duration {
                        max_duration = elapsed;
                    }
                });
                duration += max_duration;
            }
            duration
        })
    });
}

criterion_group!(
    dict_storage,
    add_cold,
    add_tail_latency,
    add_warmed_up,
    read_mixed,
    read_str
);
criterion_main!(dict_storage);
