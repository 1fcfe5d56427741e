//! WebSocket front-end.
//!
//! The accept loop and per-connection tasks run on a dedicated runtime
//! thread; the camera never blocks socket I/O because only the producer
//! thread touches it. Connections interact with the producer exclusively
//! through the subscriber registry and the status cell.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_websockets::{CloseCode, Message, ServerBuilder, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::producer::{spawn_producer, ProducerShared};
use crate::registry::{CloseCommand, SubscriberHandle, SubscriberId};
use crate::status::StreamingStatus;

/// Close sent to every open connection on graceful shutdown.
const CLOSE_SHUTDOWN: CloseCommand = CloseCommand {
    code: 1001,
    reason: "shutdown",
};

/// How long shutdown waits for connection tasks to flush their close
/// frames before tearing the runtime down.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(1_000);

struct ServerContext {
    shared: Arc<ProducerShared>,
    /// Control senders of every open connection, subscriber or not.
    connections: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<CloseCommand>>>,
    max_queue: usize,
}

/// A running streaming server.
///
/// Dropping the value stops it; [`StreamServer::stop`] does the same
/// explicitly and is idempotent.
pub struct StreamServer {
    shared: Arc<ProducerShared>,
    producer: Option<thread::JoinHandle<()>>,
    server: Option<thread::JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
    stopped: bool,
}

impl StreamServer {
    /// Bind `port`, start the producer thread and the server runtime.
    ///
    /// Port 0 picks an ephemeral port; see [`StreamServer::local_addr`].
    pub fn spawn(config: StreamConfig, port: u16) -> Result<Self> {
        let listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("binding port {port} failed"))?;
        listener
            .set_nonblocking(true)
            .context("marking the listener non-blocking failed")?;
        let local_addr = listener.local_addr().context("listener has no address")?;

        let shared = Arc::new(ProducerShared::new());
        let context = Arc::new(ServerContext {
            shared: shared.clone(),
            connections: Mutex::new(HashMap::new()),
            max_queue: config.max_queue,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let producer = spawn_producer(config, shared.clone());

        let server = thread::Builder::new()
            .name("stream-server".into())
            .spawn(move || {
                let workers = thread::available_parallelism().map_or(2, usize::from);
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(workers)
                    .enable_all()
                    .build();
                match runtime {
                    Ok(runtime) => runtime.block_on(serve(listener, context, shutdown_rx)),
                    Err(err) => warn!(error = %err, "building the server runtime failed"),
                }
            })
            .context("spawning the server thread failed")?;

        info!(addr = %local_addr, "stream server listening");
        Ok(Self {
            shared,
            producer: Some(producer),
            server: Some(server),
            shutdown,
            local_addr,
            stopped: false,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current producer status.
    pub fn status(&self) -> StreamingStatus {
        self.shared.status.load()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Graceful shutdown: raises the stop flag, stops accepting new
    /// connections, joins the producer, closes every connection with
    /// 1001/"shutdown" and stops the server loop. Safe to call twice.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.shared.stop.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        self.shared.registry.notify_all();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }

        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        info!("stream server stopped");
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    listener: std::net::TcpListener,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(error = %err, "registering the listener failed");
            return;
        }
    };

    let mut next_id: SubscriberId = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    next_id += 1;
                    let id = next_id;
                    let context = context.clone();
                    tokio::spawn(async move {
                        let ws = match ServerBuilder::new().accept(stream).await {
                            Ok((_request, ws)) => ws,
                            Err(err) => {
                                warn!(%addr, error = %err, "WebSocket handshake failed");
                                return;
                            }
                        };
                        handle_connection(id, addr, ws, context).await;
                    });
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    // Structured goodbye to every connection that is still up. The map is
    // re-scanned each round so a handshake that finished while the gate was
    // closing gets its close frame too.
    let mut notified = HashSet::new();
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN;
    loop {
        let pending: Vec<_> = context
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| !notified.contains(*id))
            .map(|(id, control)| (*id, control.clone()))
            .collect();
        for (id, control) in pending {
            let _ = control.send(CLOSE_SHUTDOWN);
            notified.insert(id);
        }
        if context.connections.lock().unwrap().is_empty()
            || tokio::time::Instant::now() >= deadline
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(
    id: SubscriberId,
    addr: SocketAddr,
    mut ws: WebSocketStream<tokio::net::TcpStream>,
    context: Arc<ServerContext>,
) {
    let (frames_tx, mut frames_rx) = mpsc::channel::<Bytes>(context.max_queue);
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<CloseCommand>();
    context
        .connections
        .lock()
        .unwrap()
        .insert(id, control_tx.clone());
    let subscriber = SubscriberHandle {
        frames: frames_tx,
        control: control_tx,
    };
    info!(%addr, "client connected");

    loop {
        tokio::select! {
            biased;

            command = control_rx.recv() => {
                let Some(command) = command else { break };
                let close = Message::close(
                    CloseCode::try_from(command.code).ok(),
                    command.reason,
                );
                if let Err(err) = ws.send(close).await {
                    debug!(%addr, error = %err, "sending close frame failed");
                }
                break;
            }

            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = ws.send(Message::binary(frame)).await {
                    warn!(%addr, error = %err, "frame send failed, dropping subscriber");
                    context.shared.registry.remove(id);
                    break;
                }
            }

            inbound = ws.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        if let Some(text) = message.as_text() {
                            let text = text.trim();
                            debug!(%addr, message = text, "control message");
                            match text {
                                "status" => {
                                    let reply = status_reply(&context);
                                    if ws.send(Message::text(reply)).await.is_err() {
                                        context.shared.registry.remove(id);
                                        break;
                                    }
                                }
                                "start" => {
                                    if context.shared.registry.add(id, subscriber.clone()) {
                                        info!(%addr, "subscribed");
                                    }
                                }
                                "stop" => {
                                    context.shared.registry.remove(id);
                                    info!(%addr, "unsubscribed");
                                }
                                other => debug!(%addr, message = other, "ignoring message"),
                            }
                        } else if message.is_close() {
                            info!(%addr, "client closed");
                            context.shared.registry.remove(id);
                            break;
                        }
                        // Binary, ping and pong frames are ignored.
                    }
                    Some(Err(err)) => {
                        warn!(%addr, error = %err, "connection error");
                        context.shared.registry.remove(id);
                        break;
                    }
                    None => {
                        context.shared.registry.remove(id);
                        break;
                    }
                }
            }
        }
    }

    context.shared.registry.remove(id);
    context.connections.lock().unwrap().remove(&id);
    info!(%addr, "client disconnected");
}

/// Wire reply for a `status` request.
fn status_reply(context: &ServerContext) -> String {
    let status = context.shared.status.load();
    if status == StreamingStatus::Streaming {
        format!(
            "streaming to {} subscribers",
            context.shared.registry.len()
        )
    } else {
        status.to_string()
    }
}
