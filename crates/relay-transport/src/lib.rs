#![deny(unsafe_code)]
//! relay-transport: pluggable stream-transport and security-layer
//! contracts. Concrete transports (`relay-transport-tcp` and, in
//! the future, `mkcp`/`websocket`/`http2`/`grpc`/`quic` implementations)
//! depend on this crate rather than on each other.

pub mod addr;
pub mod backoff;
pub mod conn;
pub mod link;
pub mod security;
pub mod settings;
pub mod stream_transport;

pub use addr::TransportSocketAddr;
pub use backoff::{dial_with_retry, DialRetryPolicy};
pub use conn::{BoxConn, Conn, FixedAddrConn};
pub use link::ConnLink;
pub use security::{NoneSecurityLayer, SecurityLayer, SecuritySettings};
pub use stream_transport::{Listener, StreamTransport, TransportSettings};
