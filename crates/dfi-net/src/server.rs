use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dfi_shared::{Message, Tag};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::handlers::SessionContext;
use crate::handshake;
use crate::local_peer::LocalPeer;

/// Limiter buckets idle longer than this are dropped.
const LIMITER_IDLE_SECS: f64 = 600.0;

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("dfi node listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections until `shutdown` flips, one task per session.
pub async fn serve(listener: TcpListener, local: Arc<LocalPeer>, mut shutdown: watch::Receiver<bool>) {
    let mut purge = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%remote, "set_nodelay failed: {e}");
                    }
                    let local = Arc::clone(&local);
                    tokio::spawn(async move {
                        if let Err(e) = run_session(stream, remote, local).await {
                            debug!(%remote, "session ended: {e}");
                        }
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            _ = purge.tick() => local.limiters().purge_stale(LIMITER_IDLE_SECS).await,
            _ = shutdown.changed() => {
                info!("listener stopped");
                break;
            }
        }
    }
}

async fn run_session<S>(stream: S, remote: SocketAddr, local: Arc<LocalPeer>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    debug!(%remote, "inbound connection");
    handle_session(stream, local).await
}

/// Authenticate the initiator, then answer its requests in order until it
/// terminates or the transport fails.
pub async fn handle_session<S>(stream: S, local: Arc<LocalPeer>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = Connection::new(stream);
    let local_entry = local.entry();
    let outcome = tokio::time::timeout(
        local.config().handshake_timeout,
        handshake::respond(
            &mut conn,
            local.identity(),
            &local_entry,
            &local.config().capabilities,
        ),
    )
    .await
    .map_err(|_| NetError::Timeout("handshake"))??;

    local.accept_entry(&outcome.entry);
    let ctx = SessionContext {
        peer: outcome.entry.address.clone(),
    };

    loop {
        let frame = match conn.recv_frame().await {
            Ok(frame) => frame,
            Err(NetError::Closed) => break,
            Err(e) => {
                conn.shutdown().await;
                return Err(e);
            }
        };

        let mut msg = match Connection::<S>::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                conn.send(Message::no(&e.to_string())).await?;
                continue;
            }
        };
        if msg.is(Tag::Terminate) {
            break;
        }

        msg.from = Some(ctx.peer.clone());
        let reply = local.handle(&ctx, msg).await;
        conn.send(reply).await?;
    }

    conn.shutdown().await;
    debug!(peer = %ctx.peer.short(), "session closed");
    Ok(())
}
