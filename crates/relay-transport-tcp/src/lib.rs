#![deny(unsafe_code)]
//! relay-transport-tcp: the `raw-tcp` stream transport plus the `tls` and
//! `reality` security layers, the only concrete transport implementation
//! in this workspace. Kept as a single crate rather than splitting the
//! stream transport from its security layers at the crate boundary.

pub mod error;
pub mod raw_tcp;
pub mod reality;
pub mod tls;

pub use raw_tcp::{RawTcpTransport, TcpConn, TcpListenerImpl};
pub use reality::RealitySecurityLayer;
pub use tls::TlsSecurityLayer;
