//! VMess inbound: reads the client's request header off the raw
//! accept-side [`Link`], authenticates it against a [`UserValidator`],
//! writes the response header, and hands the dispatcher a [`VmessLink`]
//! that transparently seals/opens every subsequent frame.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::address::Network;
use relay_core::buffer::{BufferPool, MultiBuffer};
use relay_core::error::CoreError;
use relay_core::registry::Feature;
use relay_core::service::{Dispatch, Handler, InboundHandler, Link};
use relay_core::session::{AccountVariant, OutboundFrame, Session, SpliceCopy};

use crate::crypto;
use crate::error;
use crate::framing::{DirectionKeys, VmessLink};
use crate::header::RequestHeader;
use crate::state::{VmessState, VmessStateMachine};
use crate::validator::{unix_now, UserValidator};

pub struct VmessInbound {
    tag: String,
    validator: Arc<UserValidator>,
    pool: Arc<BufferPool>,
}

impl VmessInbound {
    pub fn new(tag: impl Into<String>, validator: Arc<UserValidator>, pool: Arc<BufferPool>) -> Self {
        Self {
            tag: tag.into(),
            validator,
            pool,
        }
    }

    async fn read_request(&self, link: &mut dyn Link) -> Result<(RequestHeader, [u8; 12]), CoreError> {
        let mut acc = Vec::new();
        read_into(link, &mut acc, 16 + 12 + 2).await?;

        let mut user_id = [0u8; 16];
        user_id.copy_from_slice(&acc[0..16]);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&acc[16..28]);
        let cipher_len = u16::from_be_bytes([acc[28], acc[29]]) as usize;

        while acc.len() < 30 + cipher_len {
            read_more(link, &mut acc).await?;
        }
        let ciphertext = acc[30..30 + cipher_len].to_vec();

        let header = RequestHeader::decode_ciphertext(user_id, &nonce, &ciphertext)?;
        Ok((header, nonce))
    }
}

async fn read_more(link: &mut dyn Link, acc: &mut Vec<u8>) -> Result<(), CoreError> {
    let mb = link.read_multi_buffer().await?;
    if mb.is_empty() {
        return Err(error::truncated_header());
    }
    for b in mb.iter() {
        acc.extend_from_slice(b.as_slice());
    }
    mb.release_all();
    Ok(())
}

async fn read_into(link: &mut dyn Link, acc: &mut Vec<u8>, at_least: usize) -> Result<(), CoreError> {
    while acc.len() < at_least {
        read_more(link, acc).await?;
    }
    Ok(())
}

impl Feature for VmessInbound {
    fn type_key(&self) -> &'static str {
        "relay.protocol_vmess.inbound"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for VmessInbound {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl InboundHandler for VmessInbound {
    fn networks(&self) -> HashSet<Network> {
        HashSet::from([Network::Tcp])
    }

    async fn process(&self, session: &mut Session, mut link: Box<dyn Link>, dispatcher: &dyn Dispatch) -> Result<(), CoreError> {
        let mut fsm = VmessStateMachine::new();

        let (request, header_nonce) = self.read_request(&mut *link).await?;
        fsm.transition(VmessState::RequestHeaderSent)?;

        let user = self
            .validator
            .validate(request.user_id, request.timestamp, unix_now())?
            .clone();
        tracing::debug!(session_id = session.id(), user = %user.email(), target = %request.destination, "vmess request header accepted");
        session.inbound_mut().user = Some(user);

        fsm.transition(VmessState::ResponseHeaderPending)?;

        let response_key = crypto::derive_response_key(&request.key);
        let response_iv = crypto::derive_response_iv(&request.iv);
        let mut nonce_echo = [0u8; 4];
        nonce_echo.copy_from_slice(&header_nonce[..4]);
        let response = crate::header::ResponseHeader::new(nonce_echo);
        let response_wire = response.encode(&response_key, &response_iv)?;

        let mut out = self.pool.acquire();
        let dst = out.extend(response_wire.len())?;
        dst.copy_from_slice(&response_wire);
        link.write_multi_buffer(MultiBuffer::single(out)).await?;

        fsm.transition(VmessState::Streaming)?;

        session.push_outbound(OutboundFrame {
            tag: String::new(),
            target: request.destination,
            original_target: None,
            gateway: None,
            name: "vmess".into(),
            can_splice_copy: SpliceCopy::Allow,
        });

        let stream_link: Box<dyn Link> = Box::new(VmessLink::new(
            link,
            Arc::clone(&self.pool),
            DirectionKeys { key: response_key, iv: response_iv },
            DirectionKeys { key: request.key, iv: request.iv },
        ));

        let result = dispatcher.dispatch_link(session, stream_link).await;
        fsm.transition(VmessState::Closed)?;
        result
    }
}
