use crate::error::RouterError;
use crate::metrics::{counters, gauges};
use crate::processor;
use crate::server::RouterState;
use crate::session::Attachment;
use pamr_common::io::{read_frame, write_frame, StreamError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

/// Upper bound on the time spent flushing queued frames to a closing tunnel.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

async fn closed(mut signal: watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Read frames and run their processor inline, in receipt order.
async fn read_loop<R>(
    reader: &mut R,
    state: &RouterState,
    attachment: &Arc<Attachment>,
) -> Result<(), RouterError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(reader, state.config.max_frame_size).await {
            Ok(raw) => processor::process(state, attachment, raw)?,
            Err(StreamError::Closed) => return Ok(()),
            Err(StreamError::Frame(e)) => {
                counters::malformed_frames_total();
                return Err(RouterError::Malformed(e));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_loop<W>(
    writer: &mut W,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<(), RouterError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        write_frame(writer, &frame).await?;
    }
    Ok(())
}

/// Best-effort flush of whatever is still queued when the tunnel closes.
async fn drain<W>(writer: &mut W, outbound: &mut mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    outbound.close();
    let flush = async {
        while let Ok(frame) = outbound.try_recv() {
            if write_frame(writer, &frame).await.is_err() {
                break;
            }
        }
    };
    if timeout(DRAIN_TIMEOUT, flush).await.is_err() {
        tracing::debug!("gave up draining outbound queue");
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<RouterState>,
    mut server_shutdown: watch::Receiver<()>,
) -> Result<(), RouterError> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }
    let (mut reader, mut writer) = stream.into_split();
    let (attachment, mut outbound, close_signal) =
        Attachment::new(state.next_attachment_id(), peer_addr, state.config.outbound_queue);
    tracing::debug!(peer = %peer_addr, attachment = attachment.id(), "tunnel opened");
    gauges::inc_connections_active();

    let result = tokio::select! {
        r = read_loop(&mut reader, &state, &attachment) => r,
        r = write_loop(&mut writer, &mut outbound) => r,
        () = closed(close_signal) => Ok(()),
        _ = server_shutdown.changed() => Ok(()),
    };

    attachment.close();
    drain(&mut writer, &mut outbound).await;
    gauges::dec_connections_active();

    tunnel_closed(&state, &attachment);
    result
}

/// Announces the agent of a closed tunnel as disconnected, unless the tunnel
/// had already been replaced or detached by someone who announced it.
pub(crate) fn tunnel_closed(state: &RouterState, attachment: &Attachment) {
    let Some(agent) = attachment.agent() else {
        return;
    };
    let still_current = state
        .sessions
        .get(&agent)
        .is_some_and(|client| client.detach_if(attachment.id()));
    if still_current {
        tracing::info!(agent = %agent, peer = %attachment.peer(), "agent disconnected");
        counters::disconnections_total("tunnel_closed");
    } else if attachment.dropped_by_session() {
        tracing::info!(agent = %agent, peer = %attachment.peer(), "agent dropped after a failed send");
        counters::disconnections_total("send_failure");
    } else {
        return;
    }
    state.broadcast_disconnection(agent);
}
