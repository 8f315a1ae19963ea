//! Placement-independent tunnel operations
//!
//! A [`ProcessLauncher`] runs start, stop and staging on the machine a job
//! executes on. [`LocalLauncher`] does so in-process on the controller;
//! [`RemoteLauncher`] sends one request per operation to the `od-agent` of
//! an execution node and relays the node's job log lines to the local sink.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use od_agent::NodeLauncher;
use od_core::traits::SharedSink;
use od_core::{Placement, TunnelStartError, TunnelStopError};
use od_protocol::{
    ErrorCode, Frame, FrameCodec, Message, ProtocolError, RequestId, StartRequest, TunnelHandle,
};

/// Start, stop and staging for one placement
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Where the operations run
    fn placement(&self) -> Placement;

    /// Copy a binary onto the target machine, returning its path there
    async fn stage_binary(&self, file_name: &str, contents: Bytes) -> Result<String, TunnelStartError>;

    /// Open a tunnel; fails with `Interrupted` when `cancel` fires first
    async fn start(
        &self,
        request: &StartRequest,
        sink: SharedSink,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelStartError>;

    /// Close the tunnel behind `handle`
    async fn stop(&self, handle: &TunnelHandle, sink: SharedSink) -> Result<(), TunnelStopError>;
}

/// Picks the launcher for a job's placement
pub trait LauncherProvider: Send + Sync {
    /// Launcher running operations at `placement`
    fn launcher_for(&self, placement: Placement) -> Arc<dyn ProcessLauncher>;
}

/// Runs operations on the controller itself
pub struct LocalLauncher {
    node: Arc<NodeLauncher>,
}

impl LocalLauncher {
    /// Wrap the controller's own node launcher
    pub fn new(node: Arc<NodeLauncher>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ProcessLauncher for LocalLauncher {
    fn placement(&self) -> Placement {
        Placement::Controller
    }

    async fn stage_binary(&self, file_name: &str, contents: Bytes) -> Result<String, TunnelStartError> {
        let path = self.node.stage(file_name, &contents).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn start(
        &self,
        request: &StartRequest,
        sink: SharedSink,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelStartError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TunnelStartError::Interrupted),
            result = self.node.start(request, sink) => result,
        }
    }

    async fn stop(&self, handle: &TunnelHandle, sink: SharedSink) -> Result<(), TunnelStopError> {
        self.node.stop(handle, sink).await
    }
}

/// How long an interrupted start waits for the agent to settle the request
const WITHDRAW_TIMEOUT: Duration = Duration::from_secs(10);

type Connection = Framed<TcpStream, FrameCodec>;

/// Runs operations on an execution node through its agent
#[derive(Clone)]
pub struct RemoteLauncher {
    addr: SocketAddr,
    token: Arc<str>,
}

impl std::fmt::Debug for RemoteLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLauncher").field("addr", &self.addr).finish_non_exhaustive()
    }
}

impl RemoteLauncher {
    /// Launcher for the agent listening on `addr`, authenticating with `token`
    pub fn new(addr: SocketAddr, token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            addr,
            token: Arc::from(token),
        }
    }

    /// Agent address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check the agent is reachable, returning its hostname
    ///
    /// Needs no token.
    pub async fn ping(&self) -> Result<String, ProtocolError> {
        let socket = TcpStream::connect(self.addr).await?;
        let mut framed = Framed::new(socket, FrameCodec::new());
        let id = RequestId::next();
        framed.send(Frame::new(id, Message::Ping)).await?;
        match read_reply(&mut framed, id, None).await? {
            Message::Pong { hostname } => Ok(hostname),
            other => Err(unexpected(other)),
        }
    }

    /// Connect, authenticate and send `request`
    async fn send(&self, request: Message) -> Result<(Connection, RequestId), ProtocolError> {
        let socket = TcpStream::connect(self.addr).await?;
        let mut framed = Framed::new(socket, FrameCodec::new());
        let id = RequestId::next();

        let auth = Message::Authenticate {
            token: self.token.to_string(),
        };
        framed.send(Frame::new(id, auth)).await?;
        match read_reply(&mut framed, id, None).await? {
            Message::Authenticated => {}
            Message::Error {
                code: ErrorCode::Unauthorized,
                message,
            } => return Err(ProtocolError::Unauthorized(message)),
            other => return Err(unexpected(other)),
        }

        tracing::debug!("{} -> {}: {:?}", id, self.addr, request.message_type());
        framed.send(Frame::new(id, request)).await?;
        Ok((framed, id))
    }

    /// Send one request and wait for its terminal reply
    ///
    /// `Output` frames received meanwhile go to `sink`.
    async fn exchange(&self, request: Message, sink: Option<&SharedSink>) -> Result<Message, ProtocolError> {
        let (mut framed, id) = self.send(request).await?;
        read_reply(&mut framed, id, sink).await
    }

    /// Abandon a start request that already went out
    ///
    /// Shutting down the write half makes the agent drop the open if it is
    /// still running. A start that finished anyway still reports its
    /// handle; that tunnel is closed here.
    async fn withdraw_start(&self, mut framed: Connection, id: RequestId, sink: SharedSink) {
        tracing::warn!("Start on {} interrupted, withdrawing request", self.addr);
        if let Err(e) = framed.get_mut().shutdown().await {
            tracing::debug!("Failed to shut down connection to {}: {}", self.addr, e);
        }

        match tokio::time::timeout(WITHDRAW_TIMEOUT, read_reply(&mut framed, id, Some(&sink))).await {
            Ok(Ok(Message::TunnelStarted(handle))) => {
                tracing::info!("Tunnel on {} came up after the interrupt, closing it", handle.hostname);
                if let Err(e) = self.stop(&handle, sink).await {
                    tracing::error!("Failed to close interrupted tunnel on {}: {}", self.addr, e);
                }
            }
            Ok(Ok(reply)) => tracing::debug!("Interrupted start ended with {:?}", reply.message_type()),
            Ok(Err(ProtocolError::ConnectionClosed)) => {
                tracing::debug!("Agent {} abandoned the interrupted start", self.addr)
            }
            Ok(Err(e)) => tracing::warn!("Lost agent {} while withdrawing start: {}", self.addr, e),
            Err(_) => tracing::warn!("Agent {} did not settle the interrupted start", self.addr),
        }
    }
}

/// Read frames for `id` until a terminal reply, relaying `Output` to `sink`
async fn read_reply(
    framed: &mut Connection,
    id: RequestId,
    sink: Option<&SharedSink>,
) -> Result<Message, ProtocolError> {
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        if frame.request_id != id {
            tracing::debug!("Ignoring frame for {} on {}", frame.request_id, id);
            continue;
        }

        match frame.message {
            Message::Output { line } => {
                if let Some(sink) = sink {
                    sink.line(&line);
                }
            }
            reply => return Ok(reply),
        }
    }

    Err(ProtocolError::ConnectionClosed)
}

#[async_trait]
impl ProcessLauncher for RemoteLauncher {
    fn placement(&self) -> Placement {
        Placement::Node(self.addr)
    }

    async fn stage_binary(&self, file_name: &str, contents: Bytes) -> Result<String, TunnelStartError> {
        let request = Message::StageBinary {
            file_name: file_name.to_string(),
            contents,
        };
        match self.exchange(request, None).await? {
            Message::BinaryStaged { path } => Ok(path),
            Message::Error { message, .. } => Err(TunnelStartError::Staging(message)),
            other => Err(unexpected(other).into()),
        }
    }

    async fn start(
        &self,
        request: &StartRequest,
        sink: SharedSink,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelStartError> {
        let (mut framed, id) = tokio::select! {
            _ = cancel.cancelled() => return Err(TunnelStartError::Interrupted),
            sent = self.send(Message::StartTunnel(request.clone())) => sent?,
        };

        let reply = tokio::select! {
            reply = read_reply(&mut framed, id, Some(&sink)) => Some(reply),
            _ = cancel.cancelled() => None,
        };
        let reply = match reply {
            Some(reply) => reply?,
            None => {
                self.withdraw_start(framed, id, sink).await;
                return Err(TunnelStartError::Interrupted);
            }
        };

        match reply {
            Message::TunnelStarted(handle) => Ok(handle),
            Message::Error { code, message } => Err(match code {
                ErrorCode::ManagerUnavailable => TunnelStartError::ManagerUnavailable {
                    generation: request.generation,
                    reason: message,
                },
                ErrorCode::StagingFailed => TunnelStartError::Staging(message),
                _ => TunnelStartError::Process(message),
            }),
            other => Err(unexpected(other).into()),
        }
    }

    async fn stop(&self, handle: &TunnelHandle, sink: SharedSink) -> Result<(), TunnelStopError> {
        match self
            .exchange(Message::StopTunnel(handle.clone()), Some(&sink))
            .await?
        {
            Message::TunnelStopped => Ok(()),
            Message::Error {
                code: ErrorCode::ManagerUnavailable,
                message,
            } => Err(TunnelStopError::ManagerUnavailable {
                generation: handle.generation,
                reason: message,
            }),
            Message::Error { message, .. } => Err(TunnelStopError::Process(message)),
            other => Err(unexpected(other).into()),
        }
    }
}

fn unexpected(message: Message) -> ProtocolError {
    ProtocolError::UnexpectedMessage(message.message_type())
}

/// Launchers backed by this process and by node agents
pub struct DefaultLaunchers {
    local: Arc<LocalLauncher>,
    agent_token: String,
}

impl DefaultLaunchers {
    /// Provider running controller-placed jobs through `local` and
    /// authenticating to node agents with `agent_token`
    pub fn new(local: Arc<LocalLauncher>, agent_token: impl Into<String>) -> Self {
        Self {
            local,
            agent_token: agent_token.into(),
        }
    }
}

impl LauncherProvider for DefaultLaunchers {
    fn launcher_for(&self, placement: Placement) -> Arc<dyn ProcessLauncher> {
        match placement {
            Placement::Controller => {
                let local: Arc<LocalLauncher> = Arc::clone(&self.local);
                local
            }
            Placement::Node(addr) => Arc::new(RemoteLauncher::new(addr, self.agent_token.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use od_core::traits::{ManagerBinder, TunnelManager, TunnelProcess};
    use od_protocol::TunnelGeneration;
    use parking_lot::Mutex;

    struct PendingManager;

    #[async_trait]
    impl TunnelManager for PendingManager {
        fn generation(&self) -> TunnelGeneration {
            TunnelGeneration::Current
        }

        async fn open(
            &self,
            _request: &StartRequest,
            _sink: SharedSink,
        ) -> Result<TunnelProcess, TunnelStartError> {
            futures::future::pending().await
        }

        async fn close_for_plan(
            &self,
            _username: &str,
            _options: &str,
            _sink: SharedSink,
        ) -> Result<(), TunnelStopError> {
            Ok(())
        }
    }

    struct PendingBinder;

    impl ManagerBinder for PendingBinder {
        fn bind(&self, _generation: TunnelGeneration) -> Result<Arc<dyn TunnelManager>, TunnelStartError> {
            Ok(Arc::new(PendingManager))
        }
    }

    fn request() -> StartRequest {
        StartRequest {
            generation: TunnelGeneration::Current,
            username: "carol".to_string(),
            access_key: "key".to_string(),
            port: 4445,
            binary_path: None,
            options: String::new(),
            https_protocol: None,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_local_start_interrupted() {
        let node = Arc::new(NodeLauncher::with_hostname(
            Arc::new(PendingBinder),
            std::env::temp_dir(),
            "controller",
        ));
        let launcher = LocalLauncher::new(node);
        let cancel = CancellationToken::new();
        let sink: SharedSink = Arc::new(Mutex::new(Vec::<u8>::new()));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = launcher.start(&request(), sink, &cancel).await.unwrap_err();
        assert!(matches!(err, TunnelStartError::Interrupted));
    }

    #[tokio::test]
    async fn test_remote_unreachable_is_channel_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let launcher = RemoteLauncher::new(addr, "token");
        let sink: SharedSink = Arc::new(Mutex::new(Vec::<u8>::new()));
        let err = launcher
            .start(&request(), sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelStartError::Channel(_)));
    }

    #[test]
    fn test_provider_placement() {
        let node = Arc::new(NodeLauncher::with_hostname(
            Arc::new(PendingBinder),
            std::env::temp_dir(),
            "controller",
        ));
        let provider = DefaultLaunchers::new(Arc::new(LocalLauncher::new(node)), "token");
        assert_eq!(
            provider.launcher_for(Placement::Controller).placement(),
            Placement::Controller
        );

        let addr: SocketAddr = "10.0.0.5:7445".parse().unwrap();
        assert_eq!(
            provider.launcher_for(Placement::Node(addr)).placement(),
            Placement::Node(addr)
        );
    }
}
