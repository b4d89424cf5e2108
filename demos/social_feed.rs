//! Social Feed Walkthrough
//!
//! Registers users, publishes videos, likes, follows and comments, then prints
//! the hydrated feed and the cache statistics.
//!
//! Runs fully in memory by default. Set `VIDEO_CACHE_BACKEND=redis` (and
//! optionally `REDIS_URL`) to use a Redis server instead.
//!
//! Run with: cargo run --example social_feed

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use video_cache::{
    ANONYMOUS, Action, CacheConfig, CacheStore, CommentAction, DashMapCache, MemoryStore,
    VideoCacheSystemBuilder,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CacheConfig::from_env()?;
    let mut builder = VideoCacheSystemBuilder::new()
        .with_store(Arc::new(MemoryStore::new()))
        .with_config(config);
    if std::env::var("VIDEO_CACHE_BACKEND").as_deref() != Ok("redis") {
        let cache: Arc<dyn CacheStore> = Arc::new(DashMapCache::new());
        builder = builder.with_cache(cache);
    }
    let system = builder.build().await?;

    if !system.health_check().await {
        anyhow::bail!("cache store is not healthy");
    }
    let report = system.bootstrap_feed().await?;
    info!(?report, "Feed bootstrap finished");

    let svc = system.service();

    // 1. Accounts
    let alice = svc.register("alice", "hash-a").await?;
    let bob = svc.register("bob", "hash-b").await?;
    svc.login_cached("alice", "hash-a").await?;

    // 2. Bob publishes two clips
    let first = svc
        .publish(bob.id, "https://cdn.example/b1.mp4", "https://cdn.example/b1.jpg", "sunrise")
        .await?;
    let second = svc
        .publish(bob.id, "https://cdn.example/b2.mp4", "https://cdn.example/b2.jpg", "sunset")
        .await?;

    // 3. Alice follows Bob, likes and comments on the first clip
    svc.relation_action(alice.id, bob.id, Action::Do).await?;
    svc.favorite_action(alice.id, first.id, Action::try_from(1)?).await?;
    let comment = CommentAction::parse(1, Some("beautiful".to_string()), None)?;
    svc.comment_action(alice.id, first.id, comment).await?;

    // 4. Feeds
    let page = svc.feed(alice.id, None).await?;
    println!("=== Alice's feed ===");
    println!("{}", serde_json::to_string_pretty(&page)?);

    let anonymous = svc.feed(ANONYMOUS, None).await?;
    info!(
        videos = anonymous.videos.len(),
        next_time = anonymous.next_time,
        "Anonymous feed"
    );

    let comments = svc.comment_list(bob.id, first.id).await?;
    println!("=== Comments on '{}' ===", first.title);
    println!("{}", serde_json::to_string_pretty(&comments)?);

    // 5. Undo everything
    svc.favorite_action(alice.id, first.id, Action::Undo).await?;
    svc.relation_action(alice.id, bob.id, Action::Undo).await?;
    let followers = svc.follower_list(ANONYMOUS, bob.id).await?;
    info!(followers = followers.len(), second = second.id, "After undo");

    // 6. Statistics
    let stats = system.shutdown();
    println!("=== Cache Statistics ===");
    println!("User hits/misses:  {}/{}", stats.users.hits, stats.users.misses);
    println!("Video hits/misses: {}/{}", stats.videos.hits, stats.videos.misses);
    println!(
        "Invalidation sequences: {} started, {} completed",
        stats.invalidation.started, stats.invalidation.completed
    );

    Ok(())
}
