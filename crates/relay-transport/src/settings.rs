//! Settings recognized by the stream transports and security layers.
//! Each settings struct is handed to the matching
//! `StreamTransport`/`SecurityLayer` implementation by name; this crate
//! does not interpret them itself.

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderObfuscation {
    None,
    Srtp,
    Utp,
    WireGuard,
    Dtls,
    WechatVideo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Congestion {
    Bbr,
    Cubic,
    Reno,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MkcpSettings {
    pub mtu: u32,
    pub tti: u32,
    pub uplink_capacity: u32,
    pub downlink_capacity: u32,
    pub congestion: Congestion,
    pub read_buffer_size: u32,
    pub write_buffer_size: u32,
    pub header_obfuscation: HeaderObfuscation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebsocketSettings {
    pub path: String,
    pub host: String,
    pub early_data_size: u32,
    pub max_early_data: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrpcSettings {
    pub service_name: String,
    pub multi_mode: bool,
    pub idle_timeout: Duration,
    pub health_check_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuicSecuritySuite {
    None,
    Aes128Gcm,
    ChaCha20Poly1305,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuicSettings {
    pub security: QuicSecuritySuite,
    pub key: String,
    pub header_obfuscation: HeaderObfuscation,
}

/// Certificate source for the `tls` security layer: either a pinned,
/// pre-issued leaf, or one minted per peer from a local CA ("authority
/// issue" mode).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateMode {
    AuthorityIssue,
    AuthorityVerify,
    Pinned { chain_sha256: Vec<[u8; 32]> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsSettings {
    pub server_name: String,
    pub alpn: Vec<String>,
    pub allow_insecure: bool,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub pinned_certificate_sha256: Vec<[u8; 32]>,
    pub fingerprint: Option<String>,
    pub certificate_mode: CertificateMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// REALITY server-side settings: peeks the ClientHello and either
/// authenticates (legitimate short-id) or transparently forwards to
/// `dest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealityServerSettings {
    pub dest: String,
    pub server_names: Vec<String>,
    pub private_key: [u8; 32],
    pub short_ids: Vec<[u8; 8]>,
    pub challenge_window: Duration,
}

/// REALITY client-side settings: the ClientHello sent must fingerprint-
/// match a known browser profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealityClientSettings {
    pub server_name: String,
    pub public_key: [u8; 32],
    pub short_id: [u8; 8],
    pub fingerprint: String,
    pub spider_x: Option<String>,
}
