//! Logging facade for fanout.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files. This requires the
//! `init` feature.
//!
//! ```ignore
//! use fanout_log::{Level, LogConfig};
//!
//! let log_config = LogConfig {
//!     level: Level::Debug,
//!     ..LogConfig::default()
//! };
//!
//! fanout_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest. Each of these macros accept format strings similarly to [`println!`]
//! and structured fields in the form of `key = value`.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior, such as a thread that could not be spawned.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for lifecycle messages of slots, strands and pools.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log errors with all their causes, use the [`LogError`] wrapper.
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use fanout_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! fanout_log::error!(error = %LogError(&custom_error), "operation failed");
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate. This requires the `test` feature.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     fanout_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
