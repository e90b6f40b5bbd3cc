//! Request/response header encode and decode for the VMess handshake.
//!
//! Wire shape (request): `user_id(16, cleartext) || nonce(12, cleartext)
//! || len(u16 BE) || ciphertext`, where the ciphertext AEAD-seals
//! `timestamp(8) || iv(16) || key(16) || security_suite(1) ||
//! addr_type(1) || addr || port(2) || padding_len(1) || padding ||
//! checksum(4)` under a key derived from `user_id` alone, so the server
//! can compute the header key the moment it has read the cleartext id.
//!
//! Wire shape (response): `len(u16 BE) || ciphertext`, sealing
//! `nonce_echo(4) || command(1)` under the response key/iv the client
//! can already derive from its own request key/iv — nothing about the
//! response key material needs to cross the wire.

use rand::Rng;
use relay_core::address::{Address, Destination, Network};
use relay_core::error::CoreError;

use crate::crypto::{self, IV_LEN, KEY_LEN};
use crate::error;

pub const USER_ID_LEN: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecuritySuite {
    Aes128Gcm,
}

impl SecuritySuite {
    fn tag(self) -> u8 {
        match self {
            SecuritySuite::Aes128Gcm => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CoreError> {
        match tag {
            1 => Ok(SecuritySuite::Aes128Gcm),
            other => Err(error::invalid_security_suite(other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequestHeader {
    pub user_id: [u8; USER_ID_LEN],
    pub timestamp: u64,
    pub iv: [u8; IV_LEN],
    pub key: [u8; KEY_LEN],
    pub security: SecuritySuite,
    pub destination: Destination,
}

fn encode_address(address: &Address) -> Vec<u8> {
    match address {
        Address::Ipv4(v4) => {
            let mut out = vec![1u8];
            out.extend_from_slice(&v4.octets());
            out
        }
        Address::Ipv6(v6) => {
            let mut out = vec![3u8];
            out.extend_from_slice(&v6.octets());
            out
        }
        Address::Domain(name) => {
            let mut out = vec![2u8, name.len() as u8];
            out.extend_from_slice(name.as_bytes());
            out
        }
    }
}

fn decode_address(bytes: &[u8]) -> Result<(Address, usize), CoreError> {
    let tag = *bytes.first().ok_or_else(error::truncated_header)?;
    match tag {
        1 => {
            if bytes.len() < 5 {
                return Err(error::truncated_header());
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&bytes[1..5]);
            Ok((Address::Ipv4(octets.into()), 5))
        }
        3 => {
            if bytes.len() < 17 {
                return Err(error::truncated_header());
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[1..17]);
            Ok((Address::Ipv6(octets.into()), 17))
        }
        2 => {
            let len = *bytes.get(1).ok_or_else(error::truncated_header)? as usize;
            if bytes.len() < 2 + len {
                return Err(error::truncated_header());
            }
            let name = String::from_utf8_lossy(&bytes[2..2 + len]).into_owned();
            let address = Address::domain(name).map_err(|_| error::unsupported_address_type(2))?;
            Ok((address, 2 + len))
        }
        other => Err(error::unsupported_address_type(other)),
    }
}

impl RequestHeader {
    /// Builds a fresh request for `destination`, generating a random
    /// per-request iv/key and stamping the current Unix timestamp.
    pub fn new(user_id: [u8; USER_ID_LEN], destination: Destination) -> Self {
        let mut rng = rand::thread_rng();
        let mut iv = [0u8; IV_LEN];
        let mut key = [0u8; KEY_LEN];
        rng.fill(&mut iv);
        rng.fill(&mut key);
        Self {
            user_id,
            timestamp: crate::validator::unix_now(),
            iv,
            key,
            security: SecuritySuite::Aes128Gcm,
            destination,
        }
    }

    fn encode_plaintext(&self) -> Vec<u8> {
        let mut plain = Vec::with_capacity(64);
        plain.extend_from_slice(&self.timestamp.to_be_bytes());
        plain.extend_from_slice(&self.iv);
        plain.extend_from_slice(&self.key);
        plain.push(self.security.clone().tag());
        plain.extend_from_slice(&encode_address(self.destination.address()));
        plain.extend_from_slice(&self.destination.port().to_be_bytes());

        let padding_len = rand::thread_rng().gen_range(0..=16u8);
        plain.push(padding_len);
        plain.extend(std::iter::repeat(0u8).take(padding_len as usize));

        let checksum = crypto::fnv1a(&plain);
        plain.extend_from_slice(&checksum.to_be_bytes());
        plain
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let plaintext = self.encode_plaintext();
        let key = crypto::header_key(&self.user_id);
        let mut nonce = [0u8; crypto::NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);
        let ciphertext = crypto::seal(&key, &nonce, &plaintext)?;

        let mut wire = Vec::with_capacity(16 + 12 + 2 + ciphertext.len());
        wire.extend_from_slice(&self.user_id);
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    /// Decodes a request header's ciphertext (everything after the
    /// cleartext `user_id || nonce || len` prefix the caller has already
    /// split off), once it knows which user's key to decrypt with.
    pub fn decode_ciphertext(user_id: [u8; USER_ID_LEN], nonce: &[u8; crypto::NONCE_LEN], ciphertext: &[u8]) -> Result<Self, CoreError> {
        let key = crypto::header_key(&user_id);
        let plaintext = crypto::open(&key, nonce, ciphertext)?;

        if plaintext.len() < 8 + IV_LEN + KEY_LEN + 1 + 1 + 2 + 1 + 4 {
            return Err(error::truncated_header());
        }
        let checksum_at = plaintext.len() - 4;
        let expected = crypto::fnv1a(&plaintext[..checksum_at]);
        let actual = u32::from_be_bytes(plaintext[checksum_at..].try_into().unwrap());
        if expected != actual {
            return Err(error::checksum_mismatch());
        }

        let mut cursor = 0usize;
        let timestamp = u64::from_be_bytes(plaintext[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&plaintext[cursor..cursor + IV_LEN]);
        cursor += IV_LEN;
        let mut req_key = [0u8; KEY_LEN];
        req_key.copy_from_slice(&plaintext[cursor..cursor + KEY_LEN]);
        cursor += KEY_LEN;
        let security = SecuritySuite::from_tag(plaintext[cursor])?;
        cursor += 1;
        let (address, consumed) = decode_address(&plaintext[cursor..checksum_at])?;
        cursor += consumed;
        let port = u16::from_be_bytes(plaintext[cursor..cursor + 2].try_into().unwrap());

        let destination = Destination::new(Network::Tcp, address, port).map_err(|_| error::truncated_header())?;

        Ok(Self {
            user_id,
            timestamp,
            iv,
            key: req_key,
            security,
            destination,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ResponseHeader {
    pub nonce_echo: [u8; 4],
    pub command: u8,
}

fn response_nonce(response_iv: &[u8; IV_LEN]) -> [u8; crypto::NONCE_LEN] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest([response_iv.as_slice(), b"resp-header"].concat());
    let mut nonce = [0u8; crypto::NONCE_LEN];
    nonce.copy_from_slice(&digest[..crypto::NONCE_LEN]);
    nonce
}

impl ResponseHeader {
    pub fn new(nonce_echo: [u8; 4]) -> Self {
        Self { nonce_echo, command: 0 }
    }

    pub fn encode(&self, response_key: &[u8; KEY_LEN], response_iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CoreError> {
        let mut plaintext = Vec::with_capacity(5);
        plaintext.extend_from_slice(&self.nonce_echo);
        plaintext.push(self.command);
        let nonce = response_nonce(response_iv);
        let ciphertext = crypto::seal(response_key, &nonce, &plaintext)?;
        let mut wire = Vec::with_capacity(2 + ciphertext.len());
        wire.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    pub fn decode(ciphertext: &[u8], response_key: &[u8; KEY_LEN], response_iv: &[u8; IV_LEN]) -> Result<Self, CoreError> {
        let nonce = response_nonce(response_iv);
        let plaintext = crypto::open(response_key, &nonce, ciphertext)?;
        if plaintext.len() < 5 {
            return Err(error::truncated_header());
        }
        let mut nonce_echo = [0u8; 4];
        nonce_echo.copy_from_slice(&plaintext[..4]);
        Ok(Self { nonce_echo, command: plaintext[4] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn request_header_round_trips() {
        let user_id = [9u8; USER_ID_LEN];
        let destination = Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), 8080).unwrap();
        let req = RequestHeader::new(user_id, destination.clone());
        let wire = req.encode().unwrap();

        assert_eq!(&wire[..16], &user_id);
        let nonce: [u8; crypto::NONCE_LEN] = wire[16..28].try_into().unwrap();
        let len = u16::from_be_bytes(wire[28..30].try_into().unwrap()) as usize;
        let ciphertext = &wire[30..30 + len];

        let decoded = RequestHeader::decode_ciphertext(user_id, &nonce, ciphertext).unwrap();
        assert_eq!(decoded.destination, destination);
        assert_eq!(decoded.iv, req.iv);
        assert_eq!(decoded.key, req.key);
        assert_eq!(decoded.timestamp, req.timestamp);
    }

    #[test]
    fn request_header_with_domain_address_round_trips() {
        let user_id = [1u8; USER_ID_LEN];
        let destination = Destination::new(Network::Tcp, Address::domain("example.com").unwrap(), 443).unwrap();
        let req = RequestHeader::new(user_id, destination.clone());
        let wire = req.encode().unwrap();
        let nonce: [u8; crypto::NONCE_LEN] = wire[16..28].try_into().unwrap();
        let len = u16::from_be_bytes(wire[28..30].try_into().unwrap()) as usize;
        let decoded = RequestHeader::decode_ciphertext(user_id, &nonce, &wire[30..30 + len]).unwrap();
        assert_eq!(decoded.destination, destination);
    }

    #[test]
    fn response_header_round_trips() {
        let req_key = [2u8; KEY_LEN];
        let req_iv = [3u8; IV_LEN];
        let resp_key = crypto::derive_response_key(&req_key);
        let resp_iv = crypto::derive_response_iv(&req_iv);

        let resp = ResponseHeader::new([0xAA, 0xBB, 0xCC, 0xDD]);
        let wire = resp.encode(&resp_key, &resp_iv).unwrap();
        let len = u16::from_be_bytes(wire[..2].try_into().unwrap()) as usize;
        let decoded = ResponseHeader::decode(&wire[2..2 + len], &resp_key, &resp_iv).unwrap();
        assert_eq!(decoded.nonce_echo, resp.nonce_echo);
        assert_eq!(decoded.command, 0);
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let user_id = [4u8; USER_ID_LEN];
        let destination = Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 80).unwrap();
        let req = RequestHeader::new(user_id, destination);
        let key = crypto::header_key(&user_id);
        let mut plaintext = req.encode_plaintext();
        *plaintext.last_mut().unwrap() ^= 1;
        let nonce = [0u8; crypto::NONCE_LEN];
        let ciphertext = crypto::seal(&key, &nonce, &plaintext).unwrap();
        assert!(RequestHeader::decode_ciphertext(user_id, &nonce, &ciphertext).is_err());
    }
}
