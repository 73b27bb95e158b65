//! In-process signals notifying many independently connected slots.
//!
//! A [`Signal`] broadcasts every emitted value to its slots. Each slot is connected with one of
//! four [delivery schemes](DeliveryScheme), which decide where the slot runs:
//!
//! | Scheme                                     | Runs on                      | Ordering                          |
//! |--------------------------------------------|------------------------------|-----------------------------------|
//! | [`Synchronous`](DeliveryScheme::Synchronous)   | the emitting thread          | connection order, before `emit` returns |
//! | [`Asynchronous`](DeliveryScheme::Asynchronous) | a detached thread per emission | none                            |
//! | [`Ordered`](DeliveryScheme::Ordered)           | a dedicated thread per slot  | FIFO per slot                     |
//! | [`Pooled`](DeliveryScheme::Pooled)             | a shared [worker pool](SharedPool) | none                        |
//!
//! # Example
//!
//! ```
//! use std::sync::mpsc;
//!
//! use fanout::{DeliveryScheme, Signal};
//!
//! let signal = Signal::<String>::builder()
//!     .enforce_thread_safety(true)
//!     .build()
//!     .unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! let id = signal
//!     .connect(DeliveryScheme::Pooled, move |message| tx.send(message).unwrap())
//!     .unwrap();
//!
//! signal.emit("hello".to_owned());
//! assert_eq!(rx.recv().unwrap(), "hello");
//!
//! signal.disconnect(id);
//! assert!(signal.is_empty());
//! ```
//!
//! # Backpressure
//!
//! Asynchronous deliveries are bounded per signal by
//! [`max_concurrent_async`](SignalConfig::max_concurrent_async). Once that many deliveries are
//! running, `emit` blocks until one of them finishes.
//!
//! # Lifetimes of Emitted Values
//!
//! Asynchronous, ordered and pooled deliveries may run after `emit` returned, and even after the
//! signal was dropped. Every slot therefore receives its own clone of the value, and the value
//! type must be `Send + 'static`. Borrowed data has to be wrapped in an owning type such as
//! [`Arc`](std::sync::Arc).
//!
//! # Panics
//!
//! Slots are expected not to panic. A panic in a synchronous slot propagates to the caller of
//! `emit`. A panic in an ordered slot terminates its strand, and further deliveries to that slot
//! are dropped. Panics in pooled slots are logged by the default pool.

#![warn(missing_docs)]

mod config;
mod error;
mod scheme;
mod signal;

pub use self::config::*;
pub use self::error::*;
pub use self::scheme::*;
pub use self::signal::*;

#[doc(inline)]
pub use fanout_threading::{PoolConfig, SharedPool};
