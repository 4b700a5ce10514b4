//! Bounded pool of expensive worker resources
//!
//! Resources (browsers in production) are created once at startup and loaned
//! out exclusively to one task at a time. A loan is a [`PoolGuard`]; dropping
//! it puts the handle back, so every exit path of a task returns its resource.

use crate::{CaptchaError, SolveMetrics};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// One pooled resource together with its diagnostics.
#[derive(Debug)]
pub struct WorkerHandle<R> {
    /// Stable slot number, starting at 1
    pub slot: usize,
    resource: R,
    uses: usize,
    created_at: Instant,
}

impl<R> WorkerHandle<R> {
    fn new(slot: usize, resource: R) -> Self {
        Self {
            slot,
            resource,
            uses: 0,
            created_at: Instant::now(),
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn uses(&self) -> usize {
        self.uses
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

struct PoolInner<R> {
    name: String,
    idle: Mutex<VecDeque<WorkerHandle<R>>>,
    // One permit per idle handle; waiters queue here in FIFO order.
    semaphore: Arc<Semaphore>,
    size: usize,
    in_use: AtomicUsize,
    checkouts: AtomicUsize,
}

impl<R> PoolInner<R> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<WorkerHandle<R>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, available: usize) {
        SolveMetrics::record_pool(&self.name, available, self.size);
    }
}

/// Exclusive loan of a pooled resource.
///
/// The handle goes back to the pool when the guard is dropped, before the
/// permit is released, so the next waiter always finds it.
pub struct PoolGuard<R> {
    handle: Option<WorkerHandle<R>>,
    pool: Arc<PoolInner<R>>,
    _permit: OwnedSemaphorePermit,
}

impl<R> PoolGuard<R> {
    pub fn slot(&self) -> usize {
        self.handle().slot
    }

    pub fn handle(&self) -> &WorkerHandle<R> {
        // Only `Drop` takes the handle out.
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pool guard used after checkin"),
        }
    }
}

impl<R> Deref for PoolGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.handle().resource()
    }
}

impl<R> Drop for PoolGuard<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(slot = handle.slot, "Returning worker to pool");
            let available = {
                let mut idle = self.pool.idle();
                idle.push_back(handle);
                idle.len()
            };
            self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
            self.pool.publish(available);
        }
    }
}

/// Fixed-size pool of interchangeable resources.
pub struct ResourcePool<R> {
    inner: Arc<PoolInner<R>>,
}

impl<R> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Create `size` resources with `create` and fill the pool.
    ///
    /// Fails on the first creation error; resources built so far are dropped.
    pub async fn initialize<F, Fut>(size: usize, create: F) -> Result<Self, CaptchaError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<R, CaptchaError>>,
    {
        Self::initialize_named("workers", size, create).await
    }

    /// Like [`ResourcePool::initialize`], with `name` as the `pool` label on
    /// the availability gauges.
    pub async fn initialize_named<F, Fut>(
        name: &str,
        size: usize,
        mut create: F,
    ) -> Result<Self, CaptchaError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<R, CaptchaError>>,
    {
        if size == 0 {
            return Err(CaptchaError::ResourceCreation(
                "pool size must be greater than 0".to_string(),
            ));
        }

        let mut idle = VecDeque::with_capacity(size);
        for slot in 1..=size {
            match create(slot).await {
                Ok(resource) => {
                    debug!(slot, "Worker initialized successfully");
                    idle.push_back(WorkerHandle::new(slot, resource));
                }
                Err(e) => {
                    error!(slot, "Failed to create worker: {}", e);
                    return Err(match e {
                        CaptchaError::ResourceCreation(_) => e,
                        other => CaptchaError::ResourceCreation(other.to_string()),
                    });
                }
            }
        }

        info!(pool = name, "Worker pool initialized with {} workers", idle.len());

        let inner = PoolInner {
            name: name.to_string(),
            idle: Mutex::new(idle),
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            in_use: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
        };
        inner.publish(size);

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Wait for a free resource and take an exclusive loan on it.
    pub async fn checkout(&self) -> Result<PoolGuard<R>, CaptchaError> {
        let permit = self.inner.semaphore.clone().acquire_owned().await?;

        let (mut handle, available) = {
            let mut idle = self.inner.idle();
            let handle = idle.pop_front().ok_or(CaptchaError::PoolClosed)?;
            (handle, idle.len())
        };
        handle.uses += 1;

        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        self.inner.checkouts.fetch_add(1, Ordering::Relaxed);
        self.inner.publish(available);
        debug!(slot = handle.slot, uses = handle.uses, "Worker checked out");

        Ok(PoolGuard {
            handle: Some(handle),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Return a loan. Equivalent to dropping the guard.
    pub fn checkin(&self, guard: PoolGuard<R>) {
        drop(guard);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn available(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.size,
            available: self.available(),
            in_use: self.inner.in_use.load(Ordering::Acquire),
            checkouts: self.inner.checkouts.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    /// Stop lending, wait up to `grace` for loans to come back, then hand
    /// every idle resource to `destroy`.
    pub async fn shutdown<F, Fut>(&self, grace: Duration, mut destroy: F)
    where
        F: FnMut(R) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("Shutting down worker pool...");
        self.inner.semaphore.close();

        let deadline = Instant::now() + grace;
        while self.inner.in_use.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
        }

        let outstanding = self.inner.in_use.load(Ordering::Acquire);
        if outstanding > 0 {
            warn!("{} workers still checked out at shutdown", outstanding);
        }

        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        self.inner.publish(0);
        for handle in drained {
            debug!(slot = handle.slot, uses = handle.uses, "Destroying worker");
            destroy(handle.resource).await;
        }

        info!("Worker pool shutdown complete");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub in_use: usize,
    pub checkouts: usize,
    pub closed: bool,
}
