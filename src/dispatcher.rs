//! Task submission and the per-task solve procedure

use crate::{
    site_link, CaptchaError, Config, Outcome, ProxyConfig, ResourcePool, ResultStore,
    SessionFactory, SolveMetrics, Solver, TaskId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One accepted solve request.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub sitekey: String,
    pub proxy: Option<ProxyConfig>,
    pub submitted_at: DateTime<Utc>,
}

/// Accepts solve requests and runs each one as its own background task
/// against a pooled worker.
pub struct Dispatcher<F: SessionFactory> {
    pool: ResourcePool<F::Resource>,
    factory: Arc<F>,
    solver: Arc<dyn Solver<F::Session>>,
    store: ResultStore,
    proxy_support: bool,
    solve_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<F: SessionFactory> Dispatcher<F> {
    pub fn new(
        pool: ResourcePool<F::Resource>,
        factory: Arc<F>,
        solver: Arc<dyn Solver<F::Session>>,
        store: ResultStore,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            factory,
            solver,
            store,
            proxy_support: config.proxy_support,
            solve_timeout: config.solve_timeout,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn pool(&self) -> &ResourcePool<F::Resource> {
        &self.pool
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Number of submitted tasks that have not recorded an outcome yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Register a task and start solving it in the background.
    ///
    /// Returns as soon as the pending marker is stored; the solve itself
    /// waits for a free worker.
    pub fn submit(
        self: &Arc<Self>,
        sitekey: Option<&str>,
        proxy: Option<&str>,
    ) -> Result<TaskId, CaptchaError> {
        let sitekey = sitekey
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CaptchaError::Validation("'sitekey' is required".to_string()))?;

        if self.tracker.is_closed() {
            return Err(CaptchaError::PoolClosed);
        }

        let parsed_proxy = proxy.and_then(ProxyConfig::parse);
        if proxy.is_some() && parsed_proxy.is_none() {
            debug!("Ignoring unrecognised proxy format");
        }

        let id = self.register()?;
        let task = Task {
            id,
            sitekey: sitekey.to_string(),
            proxy: parsed_proxy,
            submitted_at: Utc::now(),
        };

        SolveMetrics::record_submission();
        debug!(task_id = %id, "Request completed with task id");

        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.run(task).await });

        Ok(id)
    }

    fn register(&self) -> Result<TaskId, CaptchaError> {
        let mut attempts = 0;
        loop {
            let id = Uuid::new_v4();
            match self.store.put_pending(id) {
                Ok(()) => return Ok(id),
                Err(e) if attempts >= 2 => return Err(e),
                Err(_) => attempts += 1,
            }
        }
    }

    async fn run(&self, task: Task) {
        let (outcome, elapsed) = self.solve(&task).await;
        SolveMetrics::record_outcome(matches!(outcome, Outcome::Success { .. }), elapsed);

        if let Err(e) = self.store.put_outcome(task.id, outcome).await {
            error!(task_id = %task.id, "Failed to record outcome: {}", e);
        }
    }

    /// Run one task to a terminal outcome. The worker is always checked back
    /// in, whatever happens during the attempt.
    pub async fn solve(&self, task: &Task) -> (Outcome, Duration) {
        let guard = match self.pool.checkout().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(task_id = %task.id, "No worker available: {}", e);
                return (Outcome::failure(Some(e.to_string()), Duration::ZERO), Duration::ZERO);
            }
        };
        let slot = guard.slot();

        debug!(
            slot,
            task_id = %task.id,
            sitekey = %task.sitekey,
            proxy = ?task.proxy.as_ref().map(ToString::to_string),
            queued_ms = (Utc::now() - task.submitted_at).num_milliseconds(),
            "Starting hCaptcha solve"
        );

        let proxy = if self.proxy_support {
            task.proxy.as_ref()
        } else {
            None
        };

        let resource = guard.handle().resource();
        let session = match self.factory.open_session(resource, proxy).await {
            Ok(session) => session,
            Err(e) => {
                error!(slot, task_id = %task.id, "Error opening session: {}", e);
                return (Outcome::failure(Some(e.to_string()), Duration::ZERO), Duration::ZERO);
            }
        };

        let started = Instant::now();
        let attempt = self.attempt(&session, task).await;
        let elapsed = started.elapsed();

        self.factory.close_session(resource, session).await;
        self.pool.checkin(guard);

        let outcome = match attempt {
            Ok(credentials) => match credentials.last() {
                Some(token) => {
                    let outcome = Outcome::success(token.clone(), elapsed);
                    info!(
                        slot,
                        task_id = %task.id,
                        token = %token.chars().take(10).collect::<String>(),
                        "Successfully solved captcha in {:.3} seconds",
                        elapsed.as_secs_f64()
                    );
                    outcome
                }
                None => {
                    debug!(slot, task_id = %task.id, "Captcha not solved in {:.3} seconds", elapsed.as_secs_f64());
                    Outcome::failure(None, elapsed)
                }
            },
            Err(e) => {
                if e.is_solve_failure() {
                    debug!(slot, task_id = %task.id, "Error solving hCaptcha: {}", e);
                } else {
                    error!(slot, task_id = %task.id, "Unexpected error solving hCaptcha: {}", e);
                }
                Outcome::failure(Some(e.to_string()), elapsed)
            }
        };

        (outcome, elapsed)
    }

    async fn attempt(&self, session: &F::Session, task: &Task) -> Result<Vec<String>, CaptchaError> {
        let cancel = self.shutdown.child_token();

        let work = async {
            if cancel.is_cancelled() {
                return Err(CaptchaError::Cancelled);
            }
            let url = site_link(&task.sitekey)?;
            self.factory.navigate(session, &url).await?;
            self.solver.solve(session, cancel.clone()).await
        };

        match timeout(self.solve_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                SolveMetrics::record_timeout();
                Err(CaptchaError::Timeout(self.solve_timeout))
            }
        }
    }

    /// Stop accepting work, cancel running solves, wait up to `grace` for
    /// them to record their outcomes and destroy every worker.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down dispatcher...");
        self.tracker.close();
        self.shutdown.cancel();

        if timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("{} tasks still running at shutdown", self.tracker.len());
        }

        let factory = self.factory.clone();
        self.pool
            .shutdown(grace, |resource| {
                let factory = factory.clone();
                async move { factory.destroy(resource).await }
            })
            .await;
    }
}
