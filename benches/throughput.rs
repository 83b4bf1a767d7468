//! Throughput Benchmark for RediKV
//!
//! Measures the keyspace, the request parser, eviction and the full
//! request path through the server core.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use redikv::config::{Config, MemoryAccounting};
use redikv::connection::{ConnectionId, Transport, TransportError};
use redikv::protocol::{process_multibulk, Reply};
use redikv::server::Server;
use redikv::storage::{
    free_memory_if_needed, EstimatedMemory, Keyspace, MaxMemoryPolicy, MemoryLimits, RedisObject,
    SystemClock,
};
use std::sync::Arc;

fn keyspace() -> Keyspace {
    Keyspace::new(0, 10, Arc::new(SystemClock))
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let mut db = keyspace();

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let lru = db.lru_clock();
            db.set_key(key, RedisObject::string("small_value", lru));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let lru = db.lru_clock();
            db.set_key(key, RedisObject::string(value.clone(), lru));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark lookups, including the lazy expiry check
fn bench_get(c: &mut Criterion) {
    let mut db = keyspace();

    // Pre-populate with data
    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let lru = db.lru_clock();
        db.set_key(key, RedisObject::string(format!("value:{}", i), lru));
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(db.lookup(key.as_bytes()).is_some());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(db.lookup(key.as_bytes()).is_some());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark the multibulk parser and reply encoding
fn bench_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");

    let request = b"*3\r\n$3\r\nset\r\n$8\r\nuser:100\r\n$11\r\nsmall_value\r\n";
    group.throughput(Throughput::Bytes(request.len() as u64));
    group.bench_function("parse_set", |b| {
        b.iter(|| black_box(process_multibulk(black_box(request))));
    });

    let reply = Reply::bulk(Bytes::from("x".repeat(1024)));
    group.bench_function("serialize_bulk_1k", |b| {
        b.iter(|| black_box(reply.serialize()));
    });

    group.finish();
}

/// Benchmark one eviction pass that has to free a single key
fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");

    for policy in [
        MaxMemoryPolicy::AllKeysLru,
        MaxMemoryPolicy::AllKeysRandom,
        MaxMemoryPolicy::VolatileTtl,
    ] {
        group.bench_function(policy.as_str(), |b| {
            b.iter_batched(
                || {
                    let mut db = keyspace();
                    let now = db.now_ms();
                    for i in 0..10_000 {
                        let key = Bytes::from(format!("key:{}", i));
                        let lru = db.lru_clock();
                        db.set_key(key, RedisObject::string("value", lru));
                        db.set_expire(format!("key:{}", i).as_bytes(), now + 60_000 + i);
                    }
                    let limits = MemoryLimits {
                        maxmemory: db.estimated_memory() as u64 - 1,
                        policy,
                        samples: 5,
                    };
                    (db, limits)
                },
                |(mut db, limits)| {
                    black_box(free_memory_if_needed(&mut db, &limits, &EstimatedMemory)).ok();
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Transport that accepts and discards every byte.
struct NullTransport;

impl Transport for NullTransport {
    fn write(&mut self, _conn: ConnectionId, data: &[u8]) -> Result<usize, TransportError> {
        Ok(data.len())
    }

    fn close(&mut self, _conn: ConnectionId) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Benchmark whole requests through the server core (80% reads, 20% writes)
fn bench_server(c: &mut Criterion) {
    let config = Config {
        maxmemory: 64 * 1024 * 1024,
        maxmemory_policy: MaxMemoryPolicy::AllKeysLru,
        memory_accounting: MemoryAccounting::Estimate,
        ..Default::default()
    };
    let mut server = Server::new(config);
    let mut transport = NullTransport;
    let conn = ConnectionId(1);
    server.on_accept(conn);

    let requests: Vec<Vec<u8>> = (0..1000)
        .map(|i| {
            let key = format!("key:{}", i);
            if i % 5 == 0 {
                format!(
                    "*3\r\n$3\r\nset\r\n${}\r\n{}\r\n$5\r\nvalue\r\n",
                    key.len(),
                    key
                )
            } else {
                format!("*2\r\n$3\r\nget\r\n${}\r\n{}\r\n", key.len(), key)
            }
            .into_bytes()
        })
        .collect();

    let mut group = c.benchmark_group("server");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0usize;
        b.iter(|| {
            server.on_data(conn, &requests[i % requests.len()], &mut transport);
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_protocol,
    bench_eviction,
    bench_server,
);

criterion_main!(benches);
