//! The pluggable security-layer contract: wraps an established [`Conn`]
//! into an authenticated/encrypted variant, the same interface. For
//! listeners the wrap happens after accept; for dialers, after dial.

use async_trait::async_trait;
use relay_core::error::CoreError;

use crate::conn::BoxConn;
use crate::settings::{RealityClientSettings, RealityServerSettings, TlsSettings};

#[derive(Clone, Debug, PartialEq)]
pub enum SecuritySettings {
    None,
    Tls(TlsSettings),
    RealityServer(RealityServerSettings),
    RealityClient(RealityClientSettings),
}

/// One named, pluggable security layer (`none`, `tls`, `reality`).
/// Handshake failures here are fatal to the session, so implementations
/// should not retry internally — that is the dial path's job, not the
/// security layer's.
#[async_trait]
pub trait SecurityLayer: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn wrap_accepted(&self, conn: BoxConn, settings: &SecuritySettings) -> Result<BoxConn, CoreError>;

    async fn wrap_dial(&self, conn: BoxConn, settings: &SecuritySettings) -> Result<BoxConn, CoreError>;
}

/// The `none` security layer: a transparent passthrough, for endpoints
/// that rely on the stream transport alone (e.g. a trusted internal
/// link) or on an outer tunnel's own encryption.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoneSecurityLayer;

#[async_trait]
impl SecurityLayer for NoneSecurityLayer {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn wrap_accepted(&self, conn: BoxConn, _settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        Ok(conn)
    }

    async fn wrap_dial(&self, conn: BoxConn, _settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        Ok(conn)
    }
}
