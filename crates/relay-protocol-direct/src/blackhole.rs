//! Blackhole outbound: never dials anywhere. Reads whatever the link
//! sends and discards it, then either closes immediately or first writes
//! a canned HTTP 403 response, depending on [`BlackholeResponse`].

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::buffer::{BufferPool, MultiBuffer};
use relay_core::error::CoreError;
use relay_core::registry::Feature;
use relay_core::service::{Handler, Link, OutboundHandler};
use relay_core::session::Session;

const HTTP_403_RESPONSE: &[u8] = b"HTTP/1.1 403 Forbidden\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlackholeResponse {
    #[default]
    None,
    Http403,
}

pub struct BlackholeOutbound {
    tag: String,
    response: BlackholeResponse,
    pool: Arc<BufferPool>,
}

impl BlackholeOutbound {
    pub fn new(tag: impl Into<String>, response: BlackholeResponse, pool: Arc<BufferPool>) -> Self {
        Self {
            tag: tag.into(),
            response,
            pool,
        }
    }
}

impl Feature for BlackholeOutbound {
    fn type_key(&self) -> &'static str {
        "relay.protocol_direct.blackhole"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for BlackholeOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl OutboundHandler for BlackholeOutbound {
    async fn process(&self, _session: &mut Session, mut link: Box<dyn Link>) -> Result<(), CoreError> {
        if self.response == BlackholeResponse::Http403 {
            let mut buf = self.pool.acquire();
            let dst = buf.extend(HTTP_403_RESPONSE.len())?;
            dst.copy_from_slice(HTTP_403_RESPONSE);
            link.write_multi_buffer(MultiBuffer::single(buf)).await?;
        }

        loop {
            let mb = link.read_multi_buffer().await?;
            let empty = mb.is_empty();
            mb.release_all();
            if empty {
                break;
            }
        }

        link.write_multi_buffer(MultiBuffer::new()).await
    }
}
