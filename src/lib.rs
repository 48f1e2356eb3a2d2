//! A Concurrent-ML style runtime: millions of lightweight jobs scheduled
//! over a small pool of workers, synchronous channels, and first-class
//! selective communication.
//!
//! The pieces compose bottom-up: a [`Job`] is a continuation-passing
//! description of work; a [`Channel`] is an unbuffered rendezvous point; an
//! [`Alt`] describes one or more potential communications and commits to
//! exactly one of them when picked. The [`Runtime`] owns the workers that
//! drive all of it.
//!
//! ```no_run
//! use rondo::{Alt, Builder, Channel};
//! use std::time::Duration;
//!
//! let rt = Builder::new().worker_threads(4).try_build().unwrap();
//! let ch: Channel<&str> = Channel::new();
//!
//! let tx = ch.clone();
//! rt.spawn(tx.send("hello"));
//!
//! let got = rt
//!     .run(Alt::choose([
//!         ch.take(),
//!         Alt::after(Duration::from_millis(50)).wrap(|()| "timeout"),
//!     ])
//!     .pick())
//!     .unwrap();
//! assert_eq!(got, "hello");
//! ```

pub mod alt;

pub mod job;

pub mod runtime;

pub mod sync;

pub(crate) mod time;

pub(crate) mod utils;

pub use alt::Alt;
pub use job::{Fault, Job};
pub use runtime::{Builder, Idle, Runtime, Worker};
pub use sync::Channel;
