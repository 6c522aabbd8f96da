#![allow(clippy::field_reassign_with_default)]

//! Message-bus client library used by every control-plane agent and by the
//! REST service. Exposes versioned message/channel definitions (`v0`), the
//! `Message`/`Bus` traits used to send requests over NATS, and the
//! `events` module implementing the restartable `EventStream`.

pub mod events;
pub mod message_bus;
pub mod send;
pub mod v0;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::{marker::PhantomData, sync::Arc};

pub use send::*;

/// A versioned channel over which messages of a given kind are sent.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Version 0 channel
    V0(v0::ChannelVs),
}
#[allow(non_snake_case)]
impl Channel {
    /// Build a version 0 channel
    pub fn v0(channel: v0::ChannelVs) -> Self {
        Self::V0(channel)
    }
}
impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V0(c) => write!(f, "v0/{}", c.to_string()),
        }
    }
}
impl std::str::FromStr for Channel {
    type Err = strum::ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("v0/")
            .unwrap_or(s)
            .parse::<v0::ChannelVs>()
            .map(Self::V0)
    }
}

/// A versioned message identifier, one per request/publish type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageId {
    /// Version 0 message id
    V0(v0::MessageIdVs),
}
#[allow(non_snake_case)]
impl MessageId {
    /// Build a version 0 message id
    pub fn v0(id: v0::MessageIdVs) -> Self {
        Self::V0(id)
    }
}

/// Unique identifier of the sender of a message; used for tracing only.
pub type SenderId = String;

/// Envelope put on the wire for every request/publish.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct SendPayload<T> {
    pub(crate) id: MessageId,
    pub(crate) data: T,
    pub(crate) sender: SenderId,
}

// MessageId doesn't derive Serialize/Deserialize on its own because v0's
// inner enum does via strum; bridge it through the string representation.
impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            Self::V0(id) => serializer.serialize_str(&id.to_string()),
        }
    }
}
impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        use serde::de::Error;
        use std::str::FromStr;
        let s = String::deserialize(deserializer)?;
        v0::MessageIdVs::from_str(&s)
            .map(Self::V0)
            .map_err(Error::custom)
    }
}

/// Envelope received back for every request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ReplyPayload<T>(pub(crate) Result<T, ReplyError>);

/// Timeout/retry options for a single bus request.
#[derive(Debug, Clone)]
pub struct TimeoutOptions {
    /// Time to wait for a single attempt
    pub timeout: std::time::Duration,
    /// Number of retries before giving up; `None` means retry forever
    pub max_retries: Option<u32>,
}
impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(6),
            max_retries: Some(2),
        }
    }
}
impl TimeoutOptions {
    /// Override the per-attempt timeout
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
    /// Override the retry count
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The kind of resource a `ReplyError` pertains to.
#[derive(
    Serialize, Deserialize, Debug, Clone, Eq, PartialEq, strum_macros::ToString,
)]
pub enum ResourceKind {
    /// Unspecified/cross-cutting
    Unknown,
    /// A storage node
    Node,
    /// A storage pool
    Pool,
    /// A replica
    Replica,
    /// A nexus
    Nexus,
    /// A volume
    Volume,
    /// The JSON gRPC passthrough surface
    JsonGrpc,
    /// A block device enumeration request
    BlockDevice,
}

/// Error-kind taxonomy shared on the wire between agents, REST and CSI.
#[derive(
    Serialize, Deserialize, Debug, Clone, Eq, PartialEq, strum_macros::ToString,
)]
pub enum ReplyErrorKind {
    /// Bad user input
    InvalidArgument,
    /// Resource already exists with incompatible parameters
    AlreadyExists,
    /// Resource not found
    NotFound,
    /// No suitable resources to satisfy the request
    ResourceExhausted,
    /// Operation invalid in the object's current state
    FailedPrecondition,
    /// Control plane still warming up
    Unavailable,
    /// RPC failure or unexpected bug
    Internal,
    /// Feature intentionally not implemented (resize, snapshots, ...)
    Unimplemented,
    /// An in-flight request was superseded and cancelled
    Cancelled,
    /// Per-call deadline exceeded
    Timeout,
    /// Alias used when propagating gRPC's own deadline-exceeded code
    DeadlineExceeded,
    /// Operation aborted
    Aborted,
    /// Value outside the accepted range
    OutOfRange,
    /// Caller lacks permission
    PermissionDenied,
    /// Caller not authenticated
    Unauthenticated,
}

/// Error returned over the bus in place of a successful reply.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplyError {
    /// Coarse-grained error kind
    pub kind: ReplyErrorKind,
    /// Resource the error pertains to
    pub resource: ResourceKind,
    /// Short, stable description
    pub source: String,
    /// Full error chain, for logs/diagnostics only
    pub extra: String,
}
impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.extra)
    }
}
impl std::error::Error for ReplyError {}

/// Low level bus send/receive error.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to serialise request for channel '{}'", channel))]
    SerializeSend {
        channel: Channel,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to deserialise reply for request '{:?}'", request))]
    DeserializeReceive {
        request: Result<String, serde_json::Error>,
        reply: Result<String, std::string::FromUtf8Error>,
        source: serde_json::Error,
    },
    #[snafu(display("Peer replied with an error"))]
    ReplyWithError { source: ReplyError },
    #[snafu(display("Failed to connect to the message bus at '{}'", url))]
    Connect {
        url: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to publish on channel '{}'", channel))]
    Publish {
        channel: Channel,
        source: std::io::Error,
    },
    #[snafu(display("Timed out waiting for a reply on channel '{}'", channel))]
    RequestTimeout { channel: Channel },
    #[snafu(display("Message bus has not been initialised"))]
    Uninitialised {},
    #[snafu(display("Failed to subscribe on channel '{}'", channel))]
    Subscribe {
        channel: Channel,
        source: std::io::Error,
    },
    #[snafu(display("Failed to deserialise inbound request"))]
    DeserializeRequest { source: serde_json::Error },
}

/// Result of a bus send/receive operation.
pub type BusResult<T> = Result<T, Error>;

/// Single reply frame coming back off the bus.
pub struct BusMessage {
    /// Raw reply payload
    pub data: Vec<u8>,
}

/// Transport used to carry request/reply and publish traffic.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, channel: Channel, payload: &[u8]) -> BusResult<()>;
    /// Request/reply with an optional timeout override
    async fn request(
        &self,
        channel: Channel,
        payload: &[u8],
        options: Option<TimeoutOptions>,
    ) -> BusResult<BusMessage>;
    /// Subscribe to every request/publish landing on `channel`; used by
    /// agents to serve requests rather than make them.
    async fn subscribe(&self, channel: Channel) -> BusResult<BusSubscription>;
}

/// Shared handle to the active bus transport.
pub type DynBus = Arc<dyn Bus>;

/// A single inbound message delivered to a subscriber. Requests carry an
/// implicit reply subject; publishes (fire-and-forget) do not, and
/// `respond` is then a no-op.
pub struct InboundMessage {
    /// Raw message payload
    pub data: Vec<u8>,
    reply_subject: Option<String>,
    conn: Option<nats::Connection>,
}
impl InboundMessage {
    /// Send `data` back to the requester, if this message expects a reply.
    pub async fn respond(&self, data: Vec<u8>) -> BusResult<()> {
        if let (Some(subject), Some(conn)) = (&self.reply_subject, &self.conn)
        {
            let conn = conn.clone();
            let subject = subject.clone();
            tokio::task::spawn_blocking(move || conn.publish(&subject, data))
                .await
                .expect("blocking nats::publish task panicked")
                .map_err(|source| Error::Publish {
                    channel: Channel::v0(v0::ChannelVs::Default),
                    source,
                })?;
        }
        Ok(())
    }

    /// Peek the message id carried in the envelope without committing to a
    /// payload type; used by `Service` to route an inbound message to the
    /// subscriber that declared it in its `filter()`.
    pub fn id(&self) -> BusResult<MessageId> {
        #[derive(Deserialize)]
        struct Envelope {
            id: MessageId,
        }
        let envelope: Envelope = serde_json::from_slice(&self.data)
            .context(DeserializeRequest {})?;
        Ok(envelope.id)
    }
}

/// A typed view of an `InboundMessage`, obtained via `TryFrom`. Borrows the
/// original message so it can still be used to send a reply.
pub struct ReceivedMessage<'a, T> {
    request: T,
    inbound: &'a InboundMessage,
}
impl<'a, T> ReceivedMessage<'a, T> {
    /// The deserialised request payload
    pub fn inner(&self) -> &T {
        &self.request
    }
    /// Send `reply` back to the requester on its implicit reply subject.
    pub async fn reply<R: Serialize + Send + Sync>(
        &self,
        reply: R,
    ) -> BusResult<()> {
        let payload = ReplyPayload(Ok(reply));
        let data = serde_json::to_vec(&payload).context(SerializeSend {
            channel: Channel::v0(v0::ChannelVs::Default),
        })?;
        self.inbound.respond(data).await
    }
}
impl<'a, T: DeserializeOwned> std::convert::TryFrom<&'a InboundMessage>
    for ReceivedMessage<'a, T>
{
    type Error = Error;
    fn try_from(inbound: &'a InboundMessage) -> Result<Self, Self::Error> {
        #[derive(Deserialize)]
        struct Envelope<T> {
            data: T,
        }
        let envelope: Envelope<T> = serde_json::from_slice(&inbound.data)
            .context(DeserializeRequest {})?;
        Ok(Self {
            request: envelope.data,
            inbound,
        })
    }
}

/// A live subscription on one channel; yields inbound messages in arrival
/// order until the underlying connection is torn down.
pub struct BusSubscription {
    rx: tokio::sync::mpsc::UnboundedReceiver<InboundMessage>,
}
impl BusSubscription {
    /// Await the next inbound message, or `None` once the subscription ends.
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

/// A message that can be sent over the bus: carries its own message id,
/// default channel, and reply type. Implemented via the `bus_impl_*!`
/// macros for every request/publish payload in `v0`.
#[async_trait]
pub trait Message: Sync + Send {
    /// Reply payload type
    type Reply: DeserializeOwned + Default + Sync + Send;

    /// This message's id
    fn id(&self) -> MessageId;
    /// This message's default channel
    fn channel(&self) -> Channel;

    /// Fire-and-forget publish on the default channel
    async fn publish(&self) -> BusResult<()>;
    /// Request/reply on the default channel
    async fn request(&self) -> BusResult<Self::Reply>;
    /// Request/reply on an explicit channel
    async fn request_on<C: Into<Channel> + Send>(
        &self,
        channel: C,
    ) -> BusResult<Self::Reply>;
    /// Request/reply on the default channel with explicit timeout options
    async fn request_ext(
        &self,
        options: TimeoutOptions,
    ) -> BusResult<Self::Reply>;
    /// Request/reply on an explicit channel with explicit timeout options
    async fn request_on_ext<C: Into<Channel> + Send>(
        &self,
        channel: C,
        options: TimeoutOptions,
    ) -> BusResult<Self::Reply>;
}

static BUS: once_cell::sync::OnceCell<DynBus> = once_cell::sync::OnceCell::new();

/// Initialise the global message bus handle. Must be called once at process
/// startup before any `Message::request`/`publish` call.
pub async fn message_bus_init(url: String) {
    let bus = nats_bus::NatsBus::connect(&url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to nats at '{}': {}", url, e));
    BUS.set(Arc::new(bus))
        .unwrap_or_else(|_| panic!("Message bus was already initialised"));
}

/// Borrow the global bus handle. Panics if `message_bus_init` was never
/// called; every agent binary calls it before serving any request.
pub fn bus() -> DynBus {
    BUS.get().cloned().expect(
        "message bus used before message_bus_init() was called",
    )
}

/// Walk an error's `source()` chain into a single human-readable string.
pub trait ErrorChain {
    /// Flatten `self` and every `source()` into one string
    fn full_string(&self) -> String;
}
impl<T: std::error::Error> ErrorChain for T {
    fn full_string(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

mod nats_bus {
    use super::*;

    /// `nats` (0.8) is a synchronous client; every call is dispatched onto
    /// the blocking thread pool so the async agents never block on I/O.
    pub(crate) struct NatsBus {
        conn: nats::Connection,
    }
    impl NatsBus {
        pub(crate) async fn connect(url: &str) -> std::io::Result<Self> {
            let url = url.to_string();
            let conn =
                tokio::task::spawn_blocking(move || nats::connect(&url))
                    .await
                    .expect("blocking nats::connect task panicked")?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl Bus for NatsBus {
        async fn publish(
            &self,
            channel: Channel,
            payload: &[u8],
        ) -> BusResult<()> {
            let conn = self.conn.clone();
            let subject = channel.to_string();
            let payload = payload.to_vec();
            tokio::task::spawn_blocking(move || {
                conn.publish(&subject, payload)
            })
            .await
            .expect("blocking nats::publish task panicked")
            .context(Publish {
                channel,
            })
        }

        async fn request(
            &self,
            channel: Channel,
            payload: &[u8],
            options: Option<TimeoutOptions>,
        ) -> BusResult<BusMessage> {
            let options = options.unwrap_or_default();
            let conn = self.conn.clone();
            let subject = channel.to_string();
            let payload = payload.to_vec();
            let timeout = options.timeout;
            let reply = tokio::task::spawn_blocking(move || {
                conn.request_timeout(&subject, payload, timeout)
            })
            .await
            .expect("blocking nats::request task panicked");
            match reply {
                Ok(msg) => Ok(BusMessage {
                    data: msg.data,
                }),
                Err(_) => Err(Error::RequestTimeout {
                    channel,
                }),
            }
        }

        async fn subscribe(
            &self,
            channel: Channel,
        ) -> BusResult<BusSubscription> {
            let subject = channel.to_string();
            let conn = self.conn.clone();
            let sub = {
                let conn = conn.clone();
                let subject = subject.clone();
                tokio::task::spawn_blocking(move || conn.subscribe(&subject))
                    .await
                    .expect("blocking nats::subscribe task panicked")
                    .context(Subscribe {
                        channel: channel.clone(),
                    })?
            };

            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            // A perpetual blocking loop belongs on a dedicated OS thread
            // rather than tokio's bounded blocking pool, which every other
            // nats call in this module borrows from for one-shot work.
            std::thread::spawn(move || {
                while let Some(msg) = sub.next() {
                    let inbound = InboundMessage {
                        data: msg.data.clone(),
                        reply_subject: msg.reply.clone(),
                        conn: Some(conn.clone()),
                    };
                    if tx.send(inbound).is_err() {
                        break;
                    }
                }
            });
            Ok(BusSubscription { rx })
        }
    }
}
