#![deny(unsafe_code)]
//! relay-core: contracts shared by the connection dispatch and transport
//! engine — buffers, sessions, the feature registry, routing data model,
//! the handler/link contract, observability and configuration.
//!
//! This crate carries no protocol or transport implementation; those live
//! in `relay-protocol-*`, `relay-transport`, `relay-transport-tcp` and
//! `relay-switch`, all built against the traits defined here.

pub mod address;
pub mod buffer;
pub mod configuration;
pub mod contract;
pub mod error;
pub mod observability;
pub mod registry;
pub mod router;
pub mod service;
pub mod session;
pub mod time;

pub use address::{Address, Destination, Network};
pub use buffer::{Buffer, BufferPool, MultiBuffer};
pub use contract::{Cancellation, Deadline};
pub use error::{CoreError, ErrorCategory, Result};
pub use registry::{Feature, FeatureKey, FeatureRegistry};
pub use service::{Dispatch, Handler, InboundHandler, Link, OutboundHandler, ReadyState};
pub use session::{ActivityTimer, Session, SpliceCopy, User};
