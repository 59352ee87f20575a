//! Integration tests for ResourcePool sizing, blocking acquire and timeouts.

use async_trait::async_trait;
use prometheus_work_scheduler::config::ResourcePoolConfig;
use prometheus_work_scheduler::core::{ResourceFactory, ResourcePool, SchedulerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// TEST FACTORY
// ============================================================================

#[derive(Default)]
struct Connections {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[async_trait]
impl ResourceFactory for Connections {
    type Resource = usize;

    async fn create(&self) -> Result<usize, SchedulerError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(self.opened.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: Arc<usize>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn single_slot(timeout_ms: u64) -> Arc<ResourcePool<Connections>> {
    let config = ResourcePoolConfig::new()
        .with_min_size(1)
        .with_max_size(1)
        .with_acquire_timeout_ms(timeout_ms)
        .with_poll_interval_ms(10);
    Arc::new(ResourcePool::new("connections", config, Connections::default()))
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_second_acquire_waits_for_release() {
    let pool = single_slot(2_000);
    pool.startup().await.unwrap();

    let first = pool.acquire().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|lease| *lease.resource().as_ref()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    let id = *first.resource().as_ref();
    pool.release(first);
    let second = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second, id);
    assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_second_acquire_times_out_without_release() {
    let pool = single_slot(100);
    pool.startup().await.unwrap();
    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.err().unwrap();
    assert!(matches!(err, SchedulerError::AcquireTimeout(t) if t == Duration::from_millis(100)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    pool.shutdown().await;
}

#[tokio::test]
async fn test_grows_to_max_then_blocks() {
    let config = ResourcePoolConfig::new()
        .with_max_size(3)
        .with_acquire_timeout_ms(50)
        .with_poll_interval_ms(10);
    let pool = Arc::new(ResourcePool::new("grow", config, Connections::default()));
    pool.startup().await.unwrap();

    let leases = vec![
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
    ];
    assert!(!pool.available());
    assert_eq!(pool.stats().in_use, 3);
    assert!(pool.acquire().await.is_err());

    for lease in leases {
        pool.release(lease);
    }
    assert!(pool.available());
    pool.shutdown().await;
    assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_acquire_after_shutdown_fails() {
    let pool = single_slot(100);
    pool.startup().await.unwrap();
    pool.shutdown().await;

    assert!(matches!(pool.acquire().await.err(), Some(SchedulerError::ShutDown)));
    assert!(matches!(pool.startup().await, Err(SchedulerError::ShutDown)));
}

/// Factory whose creations take long enough to be abandoned by a caller.
struct SlowConnections;

#[async_trait]
impl ResourceFactory for SlowConnections {
    type Resource = ();

    async fn create(&self) -> Result<(), SchedulerError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    async fn destroy(&self, _resource: Arc<()>) {}
}

#[tokio::test]
async fn test_abandoned_acquire_returns_reserved_capacity() {
    let config = ResourcePoolConfig::new()
        .with_max_size(1)
        .with_acquire_timeout_ms(2_000)
        .with_poll_interval_ms(10);
    let pool = Arc::new(ResourcePool::new("slow", config, SlowConnections));
    pool.startup().await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
    assert!(abandoned.is_err());

    let stats = pool.stats();
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.size, 0);
    assert!(pool.available());

    let lease = pool.acquire().await.unwrap();
    assert_eq!(pool.stats().in_use, 1);
    pool.release(lease);
    pool.shutdown().await;
}
