//! Performance benchmarks for the sync hot paths

use chrono::{NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use worklog::storage::queries::*;
use worklog::storage::Storage;
use worklog::sync::items::{decode_session, encode_session};
use worklog::sync::resolver::resolve;
use worklog::sync::signer::{canonical_request, sign, Credentials, SigningRequest};
use worklog::types::*;

fn bench_signing(c: &mut Criterion) {
    let credentials = Credentials {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        region: "us-east-1".to_string(),
    };
    let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let mut group = c.benchmark_group("signing");
    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![b'x'; size];
        let request = SigningRequest {
            method: "POST",
            service: "dynamodb",
            host: "dynamodb.us-east-1.amazonaws.com",
            canonical_path: "/",
            target: "DynamoDB_20120810.PutItem",
            payload: &payload,
            timestamp,
        };

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("canonical_request", size), &request, |b, r| {
            b.iter(|| canonical_request(black_box(r)))
        });
        group.bench_with_input(BenchmarkId::new("sign", size), &request, |b, r| {
            b.iter(|| sign(black_box(r), &credentials))
        });
    }
    group.finish();
}

fn bench_items(c: &mut Criterion) {
    let storage = Storage::open_in_memory().unwrap();
    let session = storage
        .with_transaction(|conn| {
            let input = NewSession::new(
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                3.5,
                "Benchmark session with a reasonably long description",
            )
            .with_notes("Some notes")
            .with_next_stage("Review");
            let session = create_session(conn, &input)?;
            assign_session_cloud_id(conn, session.id, "6f1c2b0e-bench")?;
            get_session(conn, session.id)
        })
        .unwrap();

    let mut group = c.benchmark_group("items");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_session", |b| {
        b.iter(|| encode_session(black_box("profile"), black_box(&session)).unwrap())
    });

    let item = encode_session("profile", &session).unwrap();
    group.bench_function("decode_session", |b| {
        b.iter(|| decode_session(black_box(&item)).unwrap())
    });

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for count in [100usize, 1000, 10000] {
        let pairs: Vec<(Tag, CloudTag)> = (0..count)
            .map(|i| {
                let cloud_id = format!("cloud-{}", i);
                let local = Tag {
                    id: i as LocalId,
                    name: format!("tag{}", i),
                    cloud_id: Some(cloud_id.clone()),
                    updated_at: Utc.timestamp_opt(1_700_000_000 + (i % 7) as i64, 0).unwrap(),
                    is_deleted: false,
                };
                let remote = CloudTag {
                    cloud_id,
                    name: format!("tag{}", i),
                    updated_at: Utc.timestamp_opt(1_700_000_000 + (i % 5) as i64, 0).unwrap(),
                    is_deleted: i % 11 == 0,
                };
                (local, remote)
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &pairs, |b, pairs| {
            b.iter(|| {
                pairs
                    .iter()
                    .filter(|(local, remote)| resolve(local, Some(remote)).uploads())
                    .count()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_signing, bench_items, bench_resolve);
criterion_main!(benches);
