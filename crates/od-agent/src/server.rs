//! Agent listener
//!
//! Accepts controller connections and serves one request per connection.
//! Every request except `Ping` must be preceded by the agent token. Start
//! and stop requests stream their job log lines back as `Output` frames
//! before the terminal reply.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use od_core::auth::validate_token;
use od_core::traits::{LogSink, SharedSink, TracingSink};
use od_core::{TunnelStartError, TunnelStopError};
use od_protocol::{
    ErrorCode, Frame, FrameCodec, Message, ProtocolError, RequestId, StartRequest, TunnelHandle,
};

use crate::launcher::NodeLauncher;

type Connection = Framed<TcpStream, FrameCodec>;

/// Sink that forwards lines to the connection task
///
/// Once the connection is gone, lines go to `tracing` instead.
struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
    fallback: TracingSink,
}

impl ChannelSink {
    fn new(tx: mpsc::UnboundedSender<String>, id: RequestId) -> Self {
        Self {
            tx,
            fallback: TracingSink::new(id.to_string()),
        }
    }
}

impl LogSink for ChannelSink {
    fn line(&self, line: &str) {
        if let Err(mpsc::error::SendError(line)) = self.tx.send(line.to_string()) {
            self.fallback.line(&line);
        }
    }
}

/// TCP server for controller launch requests
pub struct AgentServer {
    listener: TcpListener,
    launcher: Arc<NodeLauncher>,
    token: Arc<str>,
}

impl AgentServer {
    /// Bind the listening socket, accepting controllers presenting `token`
    pub async fn bind(addr: &str, launcher: Arc<NodeLauncher>, token: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let token: String = token.into();
        Ok(Self {
            listener,
            launcher,
            token: Arc::from(token),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Agent listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Agent server shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr, cancel.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, cancel: CancellationToken) {
        tracing::debug!("New connection from {}", peer_addr);
        let launcher = Arc::clone(&self.launcher);
        let token = Arc::clone(&self.token);

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection handler cancelled for {}", peer_addr);
                    return;
                }
                result = serve(socket, &launcher, &token) => result
            };

            match result {
                Ok(()) => tracing::debug!("Connection from {} closed", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}

/// Authenticate the peer, then serve the single request it carries
async fn serve(socket: TcpStream, launcher: &NodeLauncher, token: &str) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(socket, FrameCodec::new());
    let Some(frame) = framed.next().await.transpose()? else {
        return Ok(());
    };
    let id = frame.request_id;

    match frame.message {
        Message::Ping => {
            let reply = Message::Pong {
                hostname: launcher.hostname().to_string(),
            };
            framed.send(Frame::new(id, reply)).await
        }
        Message::Authenticate { token: presented } if validate_token(&presented, token) => {
            framed.send(Frame::new(id, Message::Authenticated)).await?;
            match framed.next().await.transpose()? {
                Some(frame) => dispatch(framed, frame, launcher).await,
                None => Ok(()),
            }
        }
        Message::Authenticate { .. } => {
            tracing::warn!("{}: rejected invalid agent token", id);
            let reply = error_reply(ErrorCode::Unauthorized, "Invalid agent token".to_string());
            framed.send(Frame::new(id, reply)).await
        }
        other => {
            tracing::warn!("{}: {:?} without authentication", id, other.message_type());
            let reply = error_reply(
                ErrorCode::Unauthorized,
                format!("Authenticate before sending {:?}", other.message_type()),
            );
            framed.send(Frame::new(id, reply)).await
        }
    }
}

async fn dispatch(mut framed: Connection, frame: Frame, launcher: &NodeLauncher) -> Result<(), ProtocolError> {
    let id = frame.request_id;
    tracing::debug!("{}: {:?}", id, frame.message.message_type());

    let reply = match frame.message {
        Message::Ping => Message::Pong {
            hostname: launcher.hostname().to_string(),
        },
        Message::StageBinary {
            file_name,
            contents,
        } => match launcher.stage(&file_name, &contents).await {
            Ok(path) => Message::BinaryStaged {
                path: path.to_string_lossy().into_owned(),
            },
            Err(e) => error_reply(ErrorCode::StagingFailed, e.to_string()),
        },
        Message::StartTunnel(request) => return start(framed, id, launcher, request).await,
        Message::StopTunnel(handle) => {
            let result = stream_output(&mut framed, id, |sink| async move {
                launcher.stop(&handle, sink).await
            })
            .await?;
            match result {
                Some(Ok(())) => Message::TunnelStopped,
                Some(Err(e)) => stop_error_reply(e),
                None => return Ok(()),
            }
        }
        other => error_reply(
            ErrorCode::InvalidMessage,
            format!("Unexpected request {:?}", other.message_type()),
        ),
    };

    framed.send(Frame::new(id, reply)).await
}

/// Open a tunnel and hand its handle to the controller
///
/// A tunnel whose handle cannot be delivered is closed again.
async fn start(
    mut framed: Connection,
    id: RequestId,
    launcher: &NodeLauncher,
    mut request: StartRequest,
) -> Result<(), ProtocolError> {
    if let Some(path) = request.binary_path.clone() {
        match launcher.confine_binary_path(&path).await {
            Ok(resolved) => request.binary_path = Some(resolved.to_string_lossy().into_owned()),
            Err(e) => {
                tracing::warn!("{}: refusing binary {}", id, path);
                return framed.send(Frame::new(id, start_error_reply(e))).await;
            }
        }
    }

    let result = stream_output(&mut framed, id, |sink| async move {
        launcher.start(&request, sink).await
    })
    .await?;

    let handle = match result {
        Some(Ok(handle)) => handle,
        Some(Err(e)) => return framed.send(Frame::new(id, start_error_reply(e))).await,
        None => {
            tracing::warn!("{}: controller went away, tunnel start aborted", id);
            return Ok(());
        }
    };

    match framed.send(Frame::new(id, Message::TunnelStarted(handle.clone()))).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!("{}: could not deliver tunnel handle ({}), closing the tunnel", id, e);
            roll_back(id, launcher, &handle).await;
            Err(e)
        }
    }
}

async fn roll_back(id: RequestId, launcher: &NodeLauncher, handle: &TunnelHandle) {
    let sink: SharedSink = Arc::new(TracingSink::new(id.to_string()));
    if let Err(e) = launcher.stop(handle, sink).await {
        tracing::error!("{}: failed to close undelivered tunnel for {}: {}", id, handle.username, e);
    }
}

/// Run `op`, relaying its job log lines as `Output` frames
///
/// Returns `None` when the peer disconnects or shuts down its write half
/// before `op` finishes; `op` is dropped then. A finished `op` always
/// yields its result, even if its last lines could not be relayed.
async fn stream_output<F, Fut, T>(
    framed: &mut Connection,
    id: RequestId,
    op: F,
) -> Result<Option<T>, ProtocolError>
where
    F: FnOnce(SharedSink) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: SharedSink = Arc::new(ChannelSink::new(tx, id));
    let op = op(sink);
    tokio::pin!(op);

    let (mut writer, mut reader) = framed.split();
    let result = loop {
        tokio::select! {
            biased;

            result = &mut op => break result,
            Some(line) = rx.recv() => {
                writer.send(Frame::new(id, Message::Output { line })).await?;
            }
            incoming = reader.next() => match incoming {
                Some(Ok(frame)) => {
                    tracing::debug!("{}: ignoring {:?} while busy", id, frame.message.message_type());
                }
                Some(Err(e)) => {
                    tracing::debug!("{}: peer read failed: {}", id, e);
                    return Ok(None);
                }
                None => return Ok(None),
            },
        }
    };

    while let Ok(line) = rx.try_recv() {
        if let Err(e) = writer.send(Frame::new(id, Message::Output { line })).await {
            tracing::debug!("{}: dropping remaining output: {}", id, e);
            break;
        }
    }
    Ok(Some(result))
}

fn error_reply(code: ErrorCode, message: String) -> Message {
    Message::Error { code, message }
}

fn start_error_reply(error: TunnelStartError) -> Message {
    let code = match &error {
        TunnelStartError::ManagerUnavailable { .. } => ErrorCode::ManagerUnavailable,
        TunnelStartError::Staging(_) => ErrorCode::StagingFailed,
        _ => ErrorCode::StartFailed,
    };
    error_reply(code, error.to_string())
}

fn stop_error_reply(error: TunnelStopError) -> Message {
    let code = match &error {
        TunnelStopError::ManagerUnavailable { .. } => ErrorCode::ManagerUnavailable,
        _ => ErrorCode::StopFailed,
    };
    error_reply(code, error.to_string())
}
