//! Lantern Common Library
//!
//! Shared runtime plumbing for the Lantern workspace members:
//!
//! - **Logging**: `tracing` subscriber setup driven by `LANTERN_LOG_*` variables
//! - **Cancellation**: [`cancel::run_cancellable`], the wrapper every store
//!   call goes through
//!
//! # Example
//!
//! ```no_run
//! use lantern_common::cancel::{run_cancellable, CancellationToken};
//!
//! # async fn demo() {
//! let token = CancellationToken::new();
//! let answer = run_cancellable(&token, || async { Ok::<_, std::io::Error>(42) }).await;
//! assert_eq!(answer.ok(), Some(42));
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cancel;
pub mod logging;

pub use cancel::{run_cancellable, OpError};
