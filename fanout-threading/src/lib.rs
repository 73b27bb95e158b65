//! # Fanout Threading
//!
//! Threading primitives that back the delivery schemes of the fanout signal dispatcher. None of
//! them know about signals or slots, they only move zero-argument jobs between threads:
//!
//! - **[`PermitGate`]**: A counting semaphore that bounds how many detached deliveries can be in
//!   flight. Permits are RAII guards, so a permit is released even if the job unwinds.
//! - **[`Strand`]**: A dedicated worker thread draining its own multi-producer, single-consumer
//!   channel in strict FIFO order. The worker polls with an exponential [`Backoff`] and falls
//!   back to a blocking receive once the backoff exceeds its ceiling.
//! - **[`WorkerPool`]**: A fixed set of worker threads sharing one job queue, configured through
//!   [`WorkerPoolBuilder`].
//! - **[`SharedPool`]**: A cheaply clonable handle to a lazily started [`WorkerPool`], shared
//!   between all signals that use it.
//!
//! ## Usage Example
//!
//! ```
//! use std::time::Duration;
//!
//! use fanout_threading::{PermitGate, Strand};
//!
//! let gate = PermitGate::new(2);
//! let permit = gate.acquire();
//! assert_eq!(gate.available(), 1);
//! drop(permit);
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let strand = Strand::spawn("example-strand".to_owned(), Duration::from_micros(100)).unwrap();
//! for value in 0..3 {
//!     let tx = tx.clone();
//!     strand.enqueue(Box::new(move || tx.send(value).unwrap())).unwrap();
//! }
//! strand.shutdown().unwrap();
//!
//! assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
//! ```
//!
//! ## Panics
//!
//! The worker pool supports custom panic handlers for both its threads and the individual jobs
//! they run. Strands do not catch panics: a panicking job terminates its strand, and the panic is
//! returned when the strand is joined.

#![warn(missing_docs)]

mod backoff;
mod builder;
mod permit;
mod pool;
mod shared;
mod strand;

pub use self::backoff::*;
pub use self::builder::*;
pub use self::permit::*;
pub use self::pool::*;
pub use self::shared::*;
pub use self::strand::*;

/// A type-erased unit of work executed by a [`Strand`] or a [`WorkerPool`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;
