//! A single bidirectional session with the host.
//!
//! Outbound requests are correlated with their responses through a map from
//! request id to a oneshot completion. Inbound requests are answered by the
//! handler registered for their method, each on its own task so a slow
//! handler never holds up the read loop. All writes go through one queue
//! drained by a dedicated writer task.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::SinkExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::codec::MessageCodec;
use crate::error::Result;
use crate::error::RpcError;
use crate::message::RequestId;
use crate::message::RpcMessage;
use crate::message::RpcNotification;
use crate::message::RpcRequest;
use crate::message::RpcResponse;

type NotificationHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
type RequestHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type Completion = oneshot::Sender<Result<Value>>;

/// How the client introduces itself during the handshake.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Handle to the session. Cloning is cheap and every clone talks to the same
/// connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    next_request_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<RpcMessage>,
    pending: Arc<Mutex<PendingCalls>>,
    notification_handlers: RwLock<HashMap<String, Vec<NotificationHandler>>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    channel_id: OnceLock<i64>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct PendingCalls {
    waiting: HashMap<RequestId, (String, Completion)>,
    /// Set once the transport has failed. New calls are rejected with this
    /// reason instead of being parked forever.
    closed: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail_pending(pending: &Mutex<PendingCalls>, reason: String) {
    let drained: Vec<(RequestId, (String, Completion))> = {
        let mut pending = lock(pending);
        if pending.closed.is_none() {
            pending.closed = Some(reason.clone());
        }
        pending.waiting.drain().collect()
    };
    if !drained.is_empty() {
        warn!("rejecting {} pending call(s): {reason}", drained.len());
    }
    for (_, (_, completion)) in drained {
        let _ = completion.send(Err(RpcError::Closed(reason.clone())));
    }
}

impl Session {
    /// Create a session that writes to `writer`. Register handlers, then call
    /// [`Session::serve`] with the read half of the stream.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(
            FramedWrite::new(writer, MessageCodec::new()),
            outgoing_rx,
            Arc::clone(&pending),
            shutdown.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                next_request_id: AtomicU64::new(1),
                outgoing,
                pending,
                notification_handlers: RwLock::new(HashMap::new()),
                request_handlers: RwLock::new(HashMap::new()),
                channel_id: OnceLock::new(),
                shutdown,
            }),
        }
    }

    /// Start the read loop. The returned task finishes when the host closes
    /// the stream or the transport fails; either way every call still waiting
    /// for a response is rejected.
    pub fn serve<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, MessageCodec::new());
            let reason = loop {
                let next = tokio::select! {
                    _ = shared.shutdown.cancelled() => break "session shut down".to_string(),
                    next = frames.next() => next,
                };
                match next {
                    Some(Ok(message)) => shared.dispatch(message),
                    Some(Err(err)) => {
                        error!("rpc transport failed: {err}");
                        break err.to_string();
                    }
                    None => {
                        debug!("host closed the rpc stream");
                        break "stream closed by host".to_string();
                    }
                }
            };
            fail_pending(&shared.pending, reason);
            shared.shutdown.cancel();
        })
    }

    /// Send a request and wait for the matching response.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.shared.pending);
            if let Some(reason) = &pending.closed {
                return Err(RpcError::Closed(reason.clone()));
            }
            pending.waiting.insert(id, (method.to_string(), tx));
        }

        let request = RpcMessage::Request(RpcRequest {
            id,
            method: method.to_string(),
            args,
        });
        if self.shared.outgoing.send(request).is_err() {
            lock(&self.shared.pending).waiting.remove(&id);
            return Err(RpcError::Closed("writer stopped".to_string()));
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Closed(format!(
                "no response to request {id} ({method})"
            ))),
        }
    }

    /// Fire-and-forget message to the host.
    pub fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(RpcError::Closed("session shut down".to_string()));
        }
        self.shared
            .outgoing
            .send(RpcMessage::Notification(RpcNotification {
                method: method.to_string(),
                args,
            }))
            .map_err(|_| RpcError::Closed("writer stopped".to_string()))
    }

    /// Register a handler for inbound notifications named `method`. Handlers
    /// for the same method run in registration order on the read loop, so
    /// they must return promptly and spawn any real work.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let mut handlers = self
            .shared
            .notification_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(method.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register the handler for inbound requests named `method`. Only one
    /// handler per method is allowed.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let mut handlers = self
            .shared
            .request_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match handlers.entry(method.into()) {
            Entry::Occupied(entry) => Err(RpcError::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                let handler: RequestHandler = Arc::new(
                    move |args: Vec<Value>| -> BoxFuture<'static, anyhow::Result<Value>> {
                        Box::pin(handler(args))
                    },
                );
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Identify this client to the host and learn the channel id the host
    /// uses to address us.
    pub async fn handshake(&self, client: &ClientInfo) -> Result<i64> {
        self.call(
            "nvim_set_client_info",
            vec![
                json!(client.name),
                json!({ "version": client.version }),
                json!("remote"),
                json!({}),
                json!({}),
            ],
        )
        .await?;

        let api_info = self.call("nvim_get_api_info", Vec::new()).await?;
        let channel_id = api_info
            .get(0)
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::Remote {
                method: "nvim_get_api_info".to_string(),
                message: format!("expected [channel_id, metadata], got {api_info}"),
            })?;
        let _ = self.shared.channel_id.set(channel_id);
        info!("rpc session ready on channel {channel_id}");
        Ok(channel_id)
    }

    /// Channel id assigned by the host, available after the handshake.
    pub fn channel_id(&self) -> Option<i64> {
        self.shared.channel_id.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Resolves once the session has ended for any reason.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await;
    }

    /// End the session from this side. Calls still waiting for a response
    /// and any later calls are rejected, whether or not `serve` ever ran.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        fail_pending(&self.shared.pending, "session shut down".to_string());
    }
}

impl Shared {
    fn dispatch(self: &Arc<Self>, message: RpcMessage) {
        match message {
            RpcMessage::Request(request) => self.handle_request(request),
            RpcMessage::Response(response) => self.handle_response(response),
            RpcMessage::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn handle_request(&self, request: RpcRequest) {
        let RpcRequest { id, method, args } = request;
        let handler = self
            .request_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&method)
            .cloned();

        let Some(handler) = handler else {
            warn!("no handler for inbound request {method}");
            let _ = self.outgoing.send(RpcMessage::Response(RpcResponse::failure(
                id,
                format!("no handler for {method}"),
            )));
            return;
        };

        let outgoing = self.outgoing.clone();
        tokio::spawn(async move {
            let response = match handler(args).await {
                Ok(result) => RpcResponse::success(id, result),
                Err(err) => {
                    debug!("request {method} ({id}) failed: {err:#}");
                    RpcResponse::failure(id, format!("{err:#}"))
                }
            };
            let _ = outgoing.send(RpcMessage::Response(response));
        });
    }

    fn handle_response(&self, response: RpcResponse) {
        let entry = lock(&self.pending).waiting.remove(&response.id);
        let Some((method, completion)) = entry else {
            warn!("dropping response for unknown request id {}", response.id);
            return;
        };

        let outcome = match response.error_message() {
            Some(message) => Err(RpcError::Remote { method, message }),
            None => Ok(response.result),
        };
        if completion.send(outcome).is_err() {
            debug!("caller for request {} is gone", response.id);
        }
    }

    fn handle_notification(&self, notification: RpcNotification) {
        let handlers = self
            .notification_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&notification.method)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!("ignoring notification {}", notification.method);
            return;
        }
        for handler in handlers {
            handler(notification.args.clone());
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, MessageCodec>,
    mut outgoing: mpsc::UnboundedReceiver<RpcMessage>,
    pending: Arc<Mutex<PendingCalls>>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = outgoing.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Err(err) = sink.send(message).await {
            error!("failed to write rpc message: {err}");
            fail_pending(&pending, format!("write failed: {err}"));
            shutdown.cancel();
            break;
        }
    }
}
