//! Benchmarks for the sharded answer cache.

use criterion::{BenchmarkId, Criterion, Throughput};
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use std::hint::black_box;
use std::str::FromStr;
use std::time::Duration;
use tokio::runtime::Runtime;

use splitdns::cache::AnswerCache;
use splitdns::dns::DnsQuery;

fn key(name: &str) -> DnsQuery {
    DnsQuery {
        domain: name.to_string(),
        qtype: 1,
        qclass: 1,
    }
}

fn message(name: &str) -> Message {
    let mut msg = Message::new();
    msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    msg
}

fn bench_cache(c: &mut Criterion) {
    // The cache reads tokio's clock, which needs a runtime context.
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();

    let cache = AnswerCache::with_capacity(16_384);
    for i in 0..1_000 {
        let name = format!("host{}.example.", i);
        cache.put(key(&name), message(&name), Duration::from_secs(3600));
    }
    let hit = key("host500.example.");
    let miss = key("absent.example.");

    let mut group = c.benchmark_group("answer_cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("get", "hit"), |b| {
        b.iter(|| cache.get(black_box(&hit)))
    });

    group.bench_function(BenchmarkId::new("get", "miss"), |b| {
        b.iter(|| cache.get(black_box(&miss)))
    });

    group.bench_function(BenchmarkId::new("put", "overwrite"), |b| {
        let response = message("host500.example.");
        b.iter(|| cache.put(hit.clone(), response.clone(), Duration::from_secs(3600)))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_cache(&mut criterion);
    criterion.final_summary();
}
