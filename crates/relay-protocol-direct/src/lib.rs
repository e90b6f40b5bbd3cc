#![deny(unsafe_code)]
//! relay-protocol-direct: handlers with no proxy wire protocol of their
//! own — Dokodemo's header-less inbound and the Freedom/Blackhole
//! outbounds.

pub mod blackhole;
pub mod dokodemo;
pub mod error;
pub mod fragment;
pub mod freedom;

pub use blackhole::{BlackholeOutbound, BlackholeResponse};
pub use dokodemo::{DokodemoInbound, DokodemoTarget};
pub use fragment::{FragmentSettings, FragmentingConn};
pub use freedom::{FreedomConfig, FreedomDomainStrategy, FreedomOutbound, IpPreference, UdpNoise};
