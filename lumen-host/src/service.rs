//! Streaming host service.
//!
//! One session per TCP client:
//!
//! ```text
//! accept ─► [auth exchange] ─► Head ─► start session
//!             │                           │
//!             │      TestPatternSource ──►│ FramePacingQueue ─► encode loop ─► Frame
//!             │                           │
//!             └─ connection reader ─► Control ─► StreamSession ─► ControlAck / Notice
//! ```
//!
//! The session lives behind a `tokio::sync::Mutex` shared by the control
//! path and the encode loop, so configuration is never read mid-update.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use lumen_core::network::{Connection, ConnectionSender};
use lumen_core::pacing::{FramePacingQueue, FrameReader, PacedRead};
use lumen_core::protocol::{AuthRequest, AuthResult, ControlAck, ControlMessage, Notice, Resolution};
use lumen_core::session::{AuthGate, StreamSession};
use lumen_core::{LumenError, MessageType, WireMessage, ZstdEncoder};

use crate::config::HostConfig;
use crate::source::TestPatternSource;

type SharedSession = Arc<Mutex<StreamSession<ZstdEncoder>>>;

// ── HostService ──────────────────────────────────────────────────

pub struct HostService {
    config: Arc<HostConfig>,
    gate: Arc<AuthGate>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    next_client: Arc<AtomicU32>,
}

impl HostService {
    pub fn new(config: HostConfig) -> Self {
        Self {
            gate: Arc::new(config.auth_gate()),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            next_client: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Clearing the flag stops the accept loop and every session.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), LumenError> {
        let listener = TcpListener::bind(self.config.listen_address()).await?;
        self.serve(listener).await
    }

    /// Serve clients from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), LumenError> {
        self.running.store(true, Ordering::SeqCst);
        info!("host listening on {}", listener.local_addr()?);

        while self.is_running() {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = wait_for_stop(&self.running) => break,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            if self.active_sessions() >= self.config.network.max_connections as usize {
                warn!(%peer, "connection limit reached; refusing client");
                continue;
            }

            let client_num = self.next_client.fetch_add(1, Ordering::SeqCst);
            info!(%peer, client_num, "client connected");

            let ctx = ClientContext {
                config: Arc::clone(&self.config),
                gate: Arc::clone(&self.gate),
                running: Arc::clone(&self.running),
                client_num,
            };
            let active = Arc::clone(&self.active);
            active.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                match serve_client(ctx, stream).await {
                    Ok(()) => info!(%peer, client_num, "session ended"),
                    Err(e) => warn!(%peer, client_num, error = %e, "session ended with error"),
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        self.running.store(false, Ordering::SeqCst);
        info!("host service stopped");
        Ok(())
    }
}

async fn wait_for_stop(running: &Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Per-client session ───────────────────────────────────────────

struct ClientContext {
    config: Arc<HostConfig>,
    gate: Arc<AuthGate>,
    running: Arc<AtomicBool>,
    client_num: u32,
}

async fn serve_client(ctx: ClientContext, stream: TcpStream) -> Result<(), LumenError> {
    let (tx, mut rx) = Connection::new(stream).split();

    if ctx.gate.is_required() {
        let timeout = Duration::from_millis(ctx.config.network.auth_timeout_ms);
        authenticate(&ctx, &tx, &mut rx, timeout).await?;
    }

    let stream_config = ctx.config.to_stream_config();
    let (frames, reader, pacing) = FramePacingQueue::new(ctx.config.to_pacing_config()).split();
    let mut session = StreamSession::new(
        stream_config.clone(),
        ZstdEncoder::new(),
        ctx.config.to_predictor_config(),
    )
    .with_pacing(pacing.clone())
    .with_client_num(ctx.client_num);
    if ctx.gate.is_required() {
        session.authorize(ctx.client_num);
    }

    tx.send(stream_config.head().into_message()?).await?;
    session.start().await?;
    let session: SharedSession = Arc::new(Mutex::new(session));

    let (resolution_tx, resolution_rx) = watch::channel(stream_config.resolution);
    let source = TestPatternSource::new(stream_config.format, ctx.config.source.fps, resolution_rx);
    let producer = tokio::spawn(source.run(frames));
    let encoder = tokio::spawn(encode_loop(Arc::clone(&session), reader, tx.clone()));

    let result = control_loop(&ctx, &session, &tx, &mut rx, &resolution_tx).await;

    session.lock().await.stop().await;
    pacing.stop();
    let _ = producer.await;
    let _ = encoder.await;
    result
}

async fn authenticate(
    ctx: &ClientContext,
    tx: &ConnectionSender,
    rx: &mut mpsc::Receiver<WireMessage>,
    timeout: Duration,
) -> Result<(), LumenError> {
    let first = tokio::time::timeout(timeout, rx.recv())
        .await
        .map_err(|_| LumenError::Timeout(timeout))?
        .ok_or(LumenError::ChannelClosed)?;

    let verdict = match first.message_type() {
        Ok(MessageType::Auth) => AuthRequest::from_bytes(first.payload())
            .and_then(|req| ctx.gate.verify(&req).map(|()| req.id)),
        _ => Err(LumenError::ProtocolViolation("first message must be Auth")),
    };

    let result = AuthResult {
        success: verdict.is_ok(),
        client_num: if verdict.is_ok() { ctx.client_num } else { 0 },
    };
    tx.send(result.into_message()?).await?;

    match verdict {
        Ok(id) => {
            info!(client_num = ctx.client_num, %id, "authenticated");
            Ok(())
        }
        Err(e) => {
            warn!(client_num = ctx.client_num, error = %e, "authentication failed");
            Err(match e {
                LumenError::AuthFailed(_) => e,
                other => LumenError::AuthFailed(other.to_string()),
            })
        }
    }
}

async fn control_loop(
    ctx: &ClientContext,
    session: &SharedSession,
    tx: &ConnectionSender,
    rx: &mut mpsc::Receiver<WireMessage>,
    resolution_tx: &watch::Sender<Resolution>,
) -> Result<(), LumenError> {
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => return Ok(()),
            },
            _ = wait_for_stop(&ctx.running) => return Ok(()),
        };

        let message_type = match msg.message_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "dropping message of unknown type");
                continue;
            }
        };

        match message_type {
            MessageType::Control => {
                let control = match ControlMessage::from_message(&msg) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "malformed control message dropped");
                        continue;
                    }
                };
                let kind = control.kind();
                let reconfigures = matches!(
                    control,
                    ControlMessage::Resolution { .. } | ControlMessage::Codec { .. }
                );

                let mut guard = session.lock().await;
                let before = guard.config().clone();
                let result = guard.handle_control(control).await;
                let after = guard.config().clone();
                let stopped = guard.phase().is_stopped();
                drop(guard);

                if kind.expects_ack() {
                    let ack = match &result {
                        Ok(()) => ControlAck::applied(),
                        Err(e) => ControlAck::rejected(e.to_string()),
                    };
                    tx.send(ack.into_message(kind)?).await?;
                }

                if reconfigures && result.is_ok() && before != after {
                    resolution_tx.send_replace(after.resolution);
                    let notice = Notice::VideoFormatChange {
                        resolution: after.resolution,
                        format: after.format,
                        codec: after.codec,
                    };
                    tx.send(notice.into_message()?).await?;
                }

                match result {
                    Err(e) if e.is_fatal() => return Err(e),
                    _ if stopped => return Ok(()),
                    _ => {}
                }
            }
            MessageType::HeadAck => debug!(ok = msg.value(), "head acknowledged"),
            MessageType::FrameAck => debug!(frame = msg.value(), "frame acknowledged"),
            MessageType::MessageAck => debug!(kind = msg.value(), "notice acknowledged"),
            other => warn!(message_type = %other, "unexpected message from client"),
        }
    }
}

async fn encode_loop(session: SharedSession, mut reader: FrameReader, tx: ConnectionSender) {
    loop {
        let packet = match reader.read_frame().await {
            PacedRead::Frame(p) => p,
            PacedRead::Idle => continue,
            PacedRead::Stopped => break,
        };

        let mut guard = session.lock().await;
        let encoded = match guard.encode_frame(&packet).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(LumenError::InvalidState(_)) => break,
            Err(e) => {
                error!(error = %e, "encode failed");
                continue;
            }
        };
        let transmit = guard.should_transmit();
        drop(guard);

        if !transmit {
            continue;
        }
        let msg = match encoded.into_payload().and_then(|p| p.into_message()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping unframeable frame");
                continue;
            }
        };
        if tx.send(msg).await.is_err() {
            break;
        }
    }
    debug!("encode loop finished");
}
