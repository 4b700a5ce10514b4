//! # hCaptcha Pool
//!
//! An HTTP API that accepts asynchronous hCaptcha solve requests, runs each one
//! on one of a fixed number of Chrome browsers and lets clients poll for the
//! result by task id.
//!
//! ## Flow
//!
//! 1. `GET /hcaptcha?sitekey=...` registers a pending task and answers `202`
//!    with its `task_id` straight away.
//! 2. A background task checks a browser out of the pool, opens an incognito
//!    session (optionally behind a proxy), loads the challenge page and lets
//!    the solver work it, under a timeout.
//! 3. The outcome is stored in memory and written to the durable result store;
//!    the browser goes back to the pool on every exit path.
//! 4. `GET /result?id=...` answers `202` while pending, `200` with the token on
//!    success and `422` on failure.
//!
//! ## Concurrency
//!
//! At most `pool_size` tasks solve at once. Excess submissions are accepted
//! and queue inside [`ResourcePool::checkout`], which hands out browsers in
//! FIFO order.
//!
//! ## CLI Usage
//!
//! ```bash
//! hcaptcha-pool --thread 4 --port 5050 --api-key $KEY
//! hcaptcha-pool --headless --useragent "Mozilla/5.0 ..." --proxy --api-key $KEY
//! ```

/// Configuration and settings for the server and its browsers
pub mod config;

/// Error types
pub mod error;

/// Generic bounded pool of worker resources
pub mod pool;

/// Chrome worker resources and isolated sessions
pub mod browser;

/// Proxy string parsing
pub mod proxy;

/// Challenge solver capability
pub mod solver;

/// Task outcomes and the result store
pub mod store;

/// Durable storage backends for outcomes
pub mod persistence;

/// Task submission and the solve procedure
pub mod dispatcher;

/// HTTP routes and handlers
pub mod server;

/// Health reporting
pub mod health;

/// Prometheus metrics
pub mod metrics;

/// Command-line interface and logging setup
pub mod cli;


pub use browser::*;
pub use cli::*;
pub use config::*;
pub use dispatcher::*;
pub use error::*;
pub use health::*;
pub use self::metrics::*;
pub use persistence::*;
pub use pool::*;
pub use proxy::*;
pub use server::*;
pub use solver::*;
pub use store::*;
