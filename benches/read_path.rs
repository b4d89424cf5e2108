//! Benchmarks for the read path
//!
//! This benchmark suite measures, against the in-memory backends:
//! - Cold entity reads (population from the store of record)
//! - Warm entity reads (field-by-field hash reconstruction)
//! - Membership checks on populated sets
//! - Hydrated feed pages of different sizes

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use video_cache::model::NewVideo;
use video_cache::{
    CacheConfig, DashMapCache, MemoryStore, RecordStore, VideoCacheSystem,
};

const USERS: i64 = 50;
const VIDEOS: i64 = 500;

/// Setup a populated in-memory system for benchmarks
fn setup_system() -> (VideoCacheSystem, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let system = rt.block_on(async {
        let store = Arc::new(MemoryStore::new());
        for i in 1..=USERS {
            store
                .create_user(&format!("user{i}"), "hash")
                .await
                .unwrap_or_else(|_| panic!("Failed to create user"));
        }
        for i in 1..=VIDEOS {
            store
                .create_video(NewVideo {
                    user_id: i % USERS + 1,
                    play_url: format!("https://cdn.example/{i}.mp4"),
                    cover_url: format!("https://cdn.example/{i}.jpg"),
                    title: format!("video {i}"),
                    create_time: i * 10,
                })
                .await
                .unwrap_or_else(|_| panic!("Failed to create video"));
        }
        VideoCacheSystem::with_backends(
            Arc::new(DashMapCache::new()),
            store,
            CacheConfig::default(),
        )
        .unwrap_or_else(|_| panic!("Failed to create system"))
    });
    (system, rt)
}

fn bench_entity_reads(c: &mut Criterion) {
    let (system, rt) = setup_system();

    let mut group = c.benchmark_group("entity_read");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("cold", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = rand::random::<i64>().rem_euclid(VIDEOS) + 1;
                system
                    .videos
                    .invalidate(id)
                    .await
                    .unwrap_or_else(|_| panic!("Failed to invalidate"));
                black_box(system.videos.read(id).await.ok());
            });
        });
    });

    rt.block_on(async {
        for id in 1..=VIDEOS {
            let _ = system.videos.read(id).await;
        }
    });

    group.bench_function("warm", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = rand::random::<i64>().rem_euclid(VIDEOS) + 1;
                black_box(system.videos.read(id).await.ok());
            });
        });
    });

    group.finish();
}

fn bench_membership(c: &mut Criterion) {
    let (system, rt) = setup_system();
    rt.block_on(async {
        for user in 1..=USERS {
            let _ = system.collections.favorite.read(user).await;
        }
    });

    c.bench_function("favorite_contains", |b| {
        b.iter(|| {
            rt.block_on(async {
                let user = rand::random::<i64>().rem_euclid(USERS) + 1;
                black_box(system.collections.favorite.contains(user, 1).await.ok());
            });
        });
    });
}

fn bench_feed(c: &mut Criterion) {
    let (system, rt) = setup_system();
    let service = system.service();
    rt.block_on(async {
        let _ = system.bootstrap_feed().await;
    });

    let mut group = c.benchmark_group("feed_page");
    for size in &[10_usize, 30] {
        group.bench_with_input(BenchmarkId::new("hydrated", size), size, |b, size| {
            b.iter(|| {
                rt.block_on(async {
                    let videos = system
                        .timeline
                        .read_videos(i64::MAX, *size)
                        .await
                        .unwrap_or_else(|_| panic!("Failed to read feed"));
                    black_box(system.assembler.video_views(1, videos).await.ok());
                });
            });
        });
    }
    group.bench_function("service_feed", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(service.feed(1, None).await.ok());
            });
        });
    });
    group.finish();
}

criterion_group!(benches, bench_entity_reads, bench_membership, bench_feed);
criterion_main!(benches);
