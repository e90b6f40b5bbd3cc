//! The bidirectional copy engine bridging a proxy handler's [`Link`] to a
//! dialed [`Conn`](relay_transport::conn::Conn). Reads either side,
//! releases buffers back to the pool once written, updates the
//! session's activity timer on every successful transfer, polls it for
//! expiry between reads, and cooperatively cancels on `Cancellation`.
//!
//! `Link` has no `split` of its own, so both directions share it behind
//! an async mutex; the two directions only ever call different methods
//! on it (`read_multi_buffer` vs `write_multi_buffer`), so the lock is
//! held briefly and contention is incidental, not structural.
//!
//! Neither direction's read can block past [`IDLE_POLL_INTERVAL`]: each
//! loop races its read against a short sleep so an expired timer or a
//! fired `Cancellation` is observed even while the peer sends nothing.

use std::sync::Arc;
use std::time::Duration;

use relay_core::buffer::{BufferPool, MultiBuffer, DEFAULT_BUFFER_CAPACITY};
use relay_core::contract::Cancellation;
use relay_core::error::CoreError;
use relay_core::service::Link;
use relay_core::session::ActivityTimer;
use relay_transport::conn::BoxConn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{self, splice_copy_allowed};

/// Per-direction flow control. `per_direction_capacity_bytes = 0` means
/// unbounded (used for reverse-proxy bridges); any other value caps how
/// much is read off the wire before it must be handed to the link,
/// which in turn caps how much the link's own backing channel or codec
/// buffers internally.
#[derive(Clone, Copy, Debug)]
pub struct PipeConfig {
    pub per_direction_capacity_bytes: usize,
    /// Once one direction observes EOF, the activity timer's timeout is
    /// cut to this value so a half-closed session does not linger at the
    /// full idle timeout waiting for the other direction to finish.
    pub half_close_timeout: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            per_direction_capacity_bytes: 512 * 1024,
            half_close_timeout: Duration::from_secs(15),
        }
    }
}

fn map_copy_error(err: std::io::Error) -> CoreError {
    relay_core::error::CoreError::wrap(
        relay_core::error::codes::TRANSPORT_IO,
        relay_core::error::ErrorCategory::Network,
        error::PIPE_COPY,
        err,
    )
}

/// How often a blocked read re-checks `cancel`/`timer` between bytes.
/// Bounds how long an idle connection can outlive its activity timeout:
/// an expiry is observed within one tick of `check_expired` actually
/// returning `true`.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runs the bidirectional copy between `link` and `conn` until either
/// side hits EOF, errors, the activity timer expires, or `cancel` fires.
/// Returns the first error either direction encountered.
pub async fn run(
    link: Box<dyn Link>,
    conn: BoxConn,
    timer: Option<Arc<ActivityTimer>>,
    pool: Arc<BufferPool>,
    config: PipeConfig,
    cancel: Cancellation,
) -> Result<(), CoreError> {
    let link = Arc::new(AsyncMutex::new(link));
    let (mut conn_read, mut conn_write) = tokio::io::split(conn);
    let scratch_len = if config.per_direction_capacity_bytes == 0 {
        DEFAULT_BUFFER_CAPACITY
    } else {
        config.per_direction_capacity_bytes.min(DEFAULT_BUFFER_CAPACITY)
    };

    let link_to_conn = {
        let link = Arc::clone(&link);
        let timer = timer.clone();
        let cancel = cancel.clone();
        async move {
            loop {
                if let Some(t) = &timer {
                    t.check_expired();
                }
                if cancel.is_cancelled() {
                    return Err(error::cancelled());
                }
                let mb = tokio::select! {
                    res = async {
                        let mut guard = link.lock().await;
                        guard.read_multi_buffer().await
                    } => res?,
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => continue,
                };
                if mb.is_empty() {
                    let _ = conn_write.shutdown().await;
                    return Ok::<(), CoreError>(());
                }
                for buf in mb.iter() {
                    conn_write.write_all(buf.as_slice()).await.map_err(map_copy_error)?;
                }
                mb.release_all();
                if let Some(t) = &timer {
                    t.update();
                }
            }
        }
    };

    let conn_to_link = {
        let link = Arc::clone(&link);
        let timer = timer.clone();
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        async move {
            let mut scratch = vec![0u8; scratch_len];
            loop {
                if let Some(t) = &timer {
                    t.check_expired();
                }
                if cancel.is_cancelled() {
                    return Err(error::cancelled());
                }
                let n = tokio::select! {
                    res = conn_read.read(&mut scratch) => res.map_err(map_copy_error)?,
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => continue,
                };
                if n == 0 {
                    let mut guard = link.lock().await;
                    let _ = guard.write_multi_buffer(MultiBuffer::new()).await;
                    return Ok::<(), CoreError>(());
                }
                let mut buf = pool.acquire();
                let dst = buf.extend(n)?;
                dst.copy_from_slice(&scratch[..n]);
                {
                    let mut guard = link.lock().await;
                    guard.write_multi_buffer(MultiBuffer::single(buf)).await?;
                }
                if let Some(t) = &timer {
                    t.update();
                }
            }
        }
    };

    tokio::pin!(link_to_conn);
    tokio::pin!(conn_to_link);

    let mut link_to_conn_result: Option<Result<(), CoreError>> = None;
    let mut conn_to_link_result: Option<Result<(), CoreError>> = None;
    while link_to_conn_result.is_none() || conn_to_link_result.is_none() {
        tokio::select! {
            res = &mut link_to_conn, if link_to_conn_result.is_none() => {
                link_to_conn_result = Some(res);
                if let Some(t) = &timer {
                    t.set_timeout(config.half_close_timeout);
                }
            }
            res = &mut conn_to_link, if conn_to_link_result.is_none() => {
                conn_to_link_result = Some(res);
                if let Some(t) = &timer {
                    t.set_timeout(config.half_close_timeout);
                }
            }
        }
    }
    link_to_conn_result.unwrap().and(conn_to_link_result.unwrap())
}

/// Whether both legs permit a splice-copy path that skips the protocol
/// codec entirely. Not wired into [`run`] yet — no handler currently
/// advertises `SpliceCopy::Allow`/`Required` on both legs simultaneously —
/// but kept here so the dispatcher can gate a future zero-copy path with
/// the same rule the pipe itself would need to honor.
pub fn can_use_splice_copy(
    inbound: relay_core::session::SpliceCopy,
    outbound: relay_core::session::SpliceCopy,
) -> bool {
    splice_copy_allowed(inbound, outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::buffer::Buffer;
    use relay_transport::conn::FixedAddrConn;
    use tokio::io::duplex;

    struct VecLink {
        inbound_frames: std::collections::VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl Link for VecLink {
        async fn read_multi_buffer(&mut self) -> Result<MultiBuffer, CoreError> {
            match self.inbound_frames.pop_front() {
                Some(bytes) => {
                    let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
                    let mut buf: Buffer = pool.acquire();
                    let dst = buf.extend(bytes.len())?;
                    dst.copy_from_slice(&bytes);
                    Ok(MultiBuffer::single(buf))
                }
                None => Ok(MultiBuffer::new()),
            }
        }

        async fn write_multi_buffer(&mut self, mb: MultiBuffer) -> Result<(), CoreError> {
            for buf in mb.iter() {
                self.written.extend_from_slice(buf.as_slice());
            }
            Ok(())
        }

        fn interrupt(&mut self) {}
    }

    #[tokio::test]
    async fn copies_link_frames_to_conn_and_back() {
        let (client, server) = duplex(256);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));

        let mut frames = std::collections::VecDeque::new();
        frames.push_back(b"hello ".to_vec());
        frames.push_back(b"world".to_vec());
        let link: Box<dyn Link> = Box::new(VecLink {
            inbound_frames: frames,
            written: Vec::new(),
        });

        let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let cancel = Cancellation::new();

        let mut client = client;
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 32];
            loop {
                let n = AsyncReadExt::read(&mut client, &mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if received.len() >= 11 {
                    break;
                }
            }
            AsyncWriteExt::shutdown(&mut client).await.unwrap();
            received
        });

        let result = run(link, conn, None, pool, PipeConfig::default(), cancel).await;
        assert!(result.is_ok());
        let received = reader.await.unwrap();
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn expired_activity_timer_interrupts_a_blocked_idle_read() {
        let (_client, server) = duplex(256);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));

        let link: Box<dyn Link> = Box::new(VecLink {
            inbound_frames: std::collections::VecDeque::new(),
            written: Vec::new(),
        });

        let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let cancel = Cancellation::new();
        let timer = Arc::new(ActivityTimer::new(Duration::from_millis(10), cancel.clone()));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run(link, conn, Some(timer), pool, PipeConfig::default(), cancel.clone()),
        )
        .await
        .expect("pipe::run must return once the activity timer expires, not block forever");

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}
