//! Platform abstraction layer for system APIs.
//!
//! The relay runs both natively (tests, host tools) and inside a browser tab as
//! WebAssembly, where `std::time::Instant::now()` panics. This module re-exports
//! the appropriate time implementation so the rest of the crate can use one
//! path without platform-specific conditionals.
//!
//! # Platform Implementations
//!
//! - **Native**: `std::time`
//! - **WASM**: `web_time`, backed by `performance.now()`
//!
//! # Examples
//!
//! ```
//! # mod sys {
//! #     pub use std::time;
//! # }
//! use sys::time::{Duration, Instant};
//!
//! let registered = Instant::now();
//! let age = registered.elapsed();
//! assert!(age < Duration::from_secs(60));
//! ```
//!
//! Always import time APIs through this module rather than directly from std.

/// Platform-appropriate time API.
///
/// - Native platforms: `std::time`
/// - WebAssembly: `web_time` (browser-compatible)
#[cfg(not(target_arch = "wasm32"))]
pub use std::time;

#[cfg(target_arch = "wasm32")]
pub use web_time as time;
