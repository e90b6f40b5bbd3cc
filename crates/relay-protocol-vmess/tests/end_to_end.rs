//! End-to-end VMess round trip: a client-shaped [`Link`] sends a VMess
//! request over an in-process channel, `VmessInbound` authenticates it
//! and hands the streaming link to a `Dispatcher`, which routes it to a
//! small XOR "echo" outbound. The client then pushes a payload through
//! its own `VmessLink` and checks the reply matches the XOR of what it
//! sent, exercising the full inbound -> dispatch -> outbound chain.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::address::{Address, Destination, Network};
use relay_core::buffer::{BufferPool, MultiBuffer, DEFAULT_BUFFER_CAPACITY};
use relay_core::error::CoreError;
use relay_core::registry::Feature;
use relay_core::router::RoutingTable;
use relay_core::service::{Dispatch, Handler, InboundHandler, Link, OutboundHandler};
use relay_core::session::{InboundLeg, Session, SpliceCopy, User};
use relay_protocol_vmess::{DirectionKeys, RequestHeader, ResponseHeader, UserValidator, VmessInbound, VmessLink};
use relay_switch::dispatcher::Dispatcher;

struct ChannelLink {
    outbound: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    inbound: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
    pool: Arc<BufferPool>,
}

#[async_trait]
impl Link for ChannelLink {
    async fn read_multi_buffer(&mut self) -> Result<MultiBuffer, CoreError> {
        match self.inbound.recv().await {
            Some(bytes) => {
                let mut buf = self.pool.acquire();
                let dst = buf.extend(bytes.len())?;
                dst.copy_from_slice(&bytes);
                Ok(MultiBuffer::single(buf))
            }
            None => Ok(MultiBuffer::new()),
        }
    }

    async fn write_multi_buffer(&mut self, mb: MultiBuffer) -> Result<(), CoreError> {
        let mut bytes = Vec::new();
        for b in mb.iter() {
            bytes.extend_from_slice(b.as_slice());
        }
        mb.release_all();
        let _ = self.outbound.send(bytes);
        Ok(())
    }

    fn interrupt(&mut self) {}
}

fn channel_pair(pool: Arc<BufferPool>) -> (ChannelLink, ChannelLink) {
    let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
    (
        ChannelLink { outbound: tx_a, inbound: rx_b, pool: Arc::clone(&pool) },
        ChannelLink { outbound: tx_b, inbound: rx_a, pool },
    )
}

/// Stands in for the "XOR echo server at 127.0.0.1:20020": every byte
/// that arrives on the streaming link comes straight back flipped.
struct XorEchoOutbound {
    tag: &'static str,
}

impl Feature for XorEchoOutbound {
    fn type_key(&self) -> &'static str {
        "test.xor_echo_outbound"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for XorEchoOutbound {
    fn tag(&self) -> &str {
        self.tag
    }
}

#[async_trait]
impl OutboundHandler for XorEchoOutbound {
    async fn process(&self, _session: &mut Session, mut link: Box<dyn Link>) -> Result<(), CoreError> {
        let mb = link.read_multi_buffer().await?;
        let mut bytes = Vec::new();
        for b in mb.iter() {
            bytes.extend_from_slice(b.as_slice());
        }
        mb.release_all();
        for b in bytes.iter_mut() {
            *b ^= 0xFF;
        }

        let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let mut out = pool.acquire();
        let dst = out.extend(bytes.len())?;
        dst.copy_from_slice(&bytes);
        link.write_multi_buffer(MultiBuffer::single(out)).await
    }
}

fn sample_session() -> Session {
    Session::new(InboundLeg {
        tag: "vmess-in".into(),
        source: Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 1).unwrap(),
        user: None,
        timer: None,
        can_splice_copy: SpliceCopy::Allow,
    })
}

#[tokio::test]
async fn vmess_round_trip_through_dispatch_to_xor_echo() {
    let payload: [u8; 16] = [
        0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xba, 0xbe, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
    ];

    let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
    let (client_link, server_link) = channel_pair(Arc::clone(&pool));

    let user_id = [0u8; 16];
    let user = User::new("u1@example.com", 0, relay_core::session::AccountVariant::Vmess { id: user_id });
    let validator = Arc::new(UserValidator::new(vec![user]));
    let inbound = VmessInbound::new("vmess-in", validator, Arc::clone(&pool));

    let mut dispatcher = Dispatcher::new(RoutingTable::default());
    dispatcher.register_outbound(Arc::new(XorEchoOutbound { tag: "freedom" }));
    dispatcher.set_default_outbound("freedom");

    let destination = Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), 20020).unwrap();
    let request = RequestHeader::new(user_id, destination);
    let request_wire = request.encode().unwrap();
    let request_key = request.key;
    let request_iv = request.iv;

    let mut client = client_link;
    let client_task = tokio::spawn(async move {
        let mut buf = pool.acquire();
        let dst = buf.extend(request_wire.len()).unwrap();
        dst.copy_from_slice(&request_wire);
        client.write_multi_buffer(MultiBuffer::single(buf)).await.unwrap();

        let response_mb = client.read_multi_buffer().await.unwrap();
        let mut response_bytes = Vec::new();
        for b in response_mb.iter() {
            response_bytes.extend_from_slice(b.as_slice());
        }
        response_mb.release_all();
        let len = u16::from_be_bytes([response_bytes[0], response_bytes[1]]) as usize;
        let response_key = relay_protocol_vmess::crypto::derive_response_key(&request_key);
        let response_iv = relay_protocol_vmess::crypto::derive_response_iv(&request_iv);
        ResponseHeader::decode(&response_bytes[2..2 + len], &response_key, &response_iv).unwrap();

        let client_keys = DirectionKeys { key: request_key, iv: request_iv };
        let server_keys = DirectionKeys { key: response_key, iv: response_iv };
        let stream_pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let mut stream = VmessLink::new(Box::new(client), Arc::clone(&stream_pool), client_keys, server_keys);

        let mut mb = MultiBuffer::new();
        let mut buf = stream_pool.acquire();
        let dst = buf.extend(payload.len()).unwrap();
        dst.copy_from_slice(&payload);
        mb.push(buf);
        stream.write_multi_buffer(mb).await.unwrap();

        let reply_mb = stream.read_multi_buffer().await.unwrap();
        let mut reply = Vec::new();
        for b in reply_mb.iter() {
            reply.extend_from_slice(b.as_slice());
        }
        reply_mb.release_all();
        reply
    });

    let mut session = sample_session();
    inbound.process(&mut session, Box::new(server_link), &dispatcher).await.unwrap();

    let reply = client_task.await.unwrap();
    let expected: Vec<u8> = payload.iter().map(|b| b ^ 0xFF).collect();
    assert_eq!(reply, expected);
}
