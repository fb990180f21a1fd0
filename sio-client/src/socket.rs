//! The Namespace Socket (§4.E): a virtual, independently opened/closed
//! logical channel riding on top of the [`Manager`], with per-channel event
//! emission, ack correlation, and send/receive buffering across
//! disconnects.
//!
//! A [`Socket`] multiplexes arbitrary, caller-defined event names per
//! namespace, dispatched the same way [`crate::manager::ManagerEvent`] fans
//! out one level down — a registry of named handlers rather than a single
//! flat event stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use sio_core::constants::is_reserved_event;
use sio_core::error::{SioError, SioResult};
use sio_protocol::{EventArg, Packet, PacketType};
use tracing::{debug, warn};

use crate::manager::{Manager, ManagerEvent, ReadyState};
use crate::subscription::Subscription;

/// A socket's authentication payload (§3.4 `auth`): either a literal JSON
/// value or a provider invoked with a callback, matching the source's
/// `auth: value | (cb) => cb(value)` union.
#[derive(Clone)]
pub enum Auth {
    None,
    Value(Value),
    Provider(Arc<dyn Fn(Box<dyn FnOnce(Value) + Send>) + Send + Sync>),
}

impl Default for Auth {
    fn default() -> Self {
        Auth::None
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => write!(f, "Auth::None"),
            Auth::Value(v) => write!(f, "Auth::Value({v})"),
            Auth::Provider(_) => write!(f, "Auth::Provider(..)"),
        }
    }
}

/// Per-socket construction options (§6.3 "Socket options").
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub auth: Auth,
    /// Query string carried once, on the first outbound CONNECT (§6.4).
    pub query: Option<String>,
}

/// One-shot per-`emit` modifier record (§3.4 `flags`, §9 design note).
#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    compress: Option<bool>,
    binary: Option<bool>,
    volatile: bool,
}

type AckCallback = Box<dyn FnOnce(Vec<EventArg>) + Send>;
type EventHandler = Arc<dyn Fn(&[EventArg], Option<AckResponder>) + Send + Sync>;

struct Inner {
    id: Option<String>,
    connected: bool,
    disconnected: bool,
    next_ack_id: u64,
    acks: HashMap<u64, AckCallback>,
    send_buffer: VecDeque<Packet>,
    receive_buffer: VecDeque<(String, Vec<EventArg>, Option<u64>)>,
    flags: Flags,
    subs: Option<Vec<Subscription>>,
}

/// The callback handed to an inbound EVENT's handler when the packet
/// carries an ack id (§4.E "Ack callback"). Guarded so repeated
/// invocations are no-ops, protecting against servers that double-fire.
#[derive(Clone)]
pub struct AckResponder {
    socket: Arc<Socket>,
    id: u64,
    fired: Arc<AtomicBool>,
}

impl AckResponder {
    /// Send the ACK (or BINARY_ACK, auto-selected by binary detection)
    /// carrying `args`. A no-op on any call after the first.
    pub fn call(&self, args: Vec<EventArg>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("ack {} already fired, ignoring duplicate", self.id);
            return;
        }
        self.socket.send_ack(self.id, args);
    }
}

/// A namespace-scoped logical channel multiplexed over a [`Manager`]'s one
/// engine transport (§4.E).
pub struct Socket {
    manager: Arc<Manager>,
    nsp: String,
    opts: SocketOptions,
    self_weak: Weak<Socket>,
    inner: Mutex<Inner>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl Socket {
    pub(crate) fn new(manager: Arc<Manager>, nsp: String, opts: SocketOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| Socket {
            manager,
            nsp,
            opts,
            self_weak: weak.clone(),
            inner: Mutex::new(Inner {
                id: None,
                connected: false,
                disconnected: true,
                next_ack_id: 0,
                acks: HashMap::new(),
                send_buffer: VecDeque::new(),
                receive_buffer: VecDeque::new(),
                flags: Flags::default(),
                subs: None,
            }),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// The server-assigned session id, present only while connected (§3.4).
    pub fn id(&self) -> Option<String> {
        sio_core::lock(&self.inner).id.clone()
    }

    pub fn connected(&self) -> bool {
        sio_core::lock(&self.inner).connected
    }

    pub fn disconnected(&self) -> bool {
        sio_core::lock(&self.inner).disconnected
    }

    /// Read-only back-reference to the owning Manager (§3 supplemented
    /// features: `Socket::io()`), e.g. to compare against `manager.engine_id()`.
    pub fn io(&self) -> Arc<Manager> {
        self.manager.clone()
    }

    /// Register a handler for `event`. Reserved names (`connect`,
    /// `disconnect`, ...) may be listened on even though they can never be
    /// `emit`ted (§4.E "Reserved events").
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&[EventArg], Option<AckResponder>) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Emit `event` with `args`, queuing it on `sendBuffer` if currently
    /// disconnected (§4.E "Emit semantics").
    pub fn emit(&self, event: &str, args: Vec<EventArg>) -> SioResult<()> {
        self.emit_inner(event, args, None)
    }

    /// Emit `event` expecting an ack; `ack` fires once the server's
    /// ACK/BINARY_ACK packet for this id is decoded.
    pub fn emit_with_ack<F>(&self, event: &str, args: Vec<EventArg>, ack: F) -> SioResult<()>
    where
        F: FnOnce(Vec<EventArg>) + Send + 'static,
    {
        self.emit_inner(event, args, Some(Box::new(ack)))
    }

    /// Alias for `emit("message", args)` (§4.E).
    pub fn send(&self, args: Vec<EventArg>) -> SioResult<()> {
        self.emit("message", args)
    }

    fn emit_inner(&self, event: &str, args: Vec<EventArg>, ack: Option<AckCallback>) -> SioResult<()> {
        if is_reserved_event(event) {
            return Err(SioError::ReservedEvent(event.to_string()));
        }

        let packet_to_send = {
            let mut inner = sio_core::lock(&self.inner);
            let flags = inner.flags;
            let mut packet = Packet::event(self.nsp.clone(), event, args);

            if let Some(force_binary) = flags.binary {
                packet.ptype = if force_binary {
                    packet.ptype.as_binary()
                } else {
                    packet.ptype.as_non_binary()
                };
            }
            packet.options.compress = flags.compress.unwrap_or(true);

            if let Some(cb) = ack {
                let id = inner.next_ack_id;
                inner.next_ack_id += 1;
                inner.acks.insert(id, cb);
                packet = packet.with_id(id);
            }

            let to_send = if inner.connected {
                Some(packet)
            } else {
                if !flags.volatile {
                    inner.send_buffer.push_back(packet);
                } else {
                    debug!("dropping volatile emit of {event} while disconnected");
                }
                None
            };

            inner.flags = Flags::default();
            to_send
        };

        if let Some(packet) = packet_to_send {
            self.send_packet(packet);
        }
        Ok(())
    }

    /// One-shot: force `compress` on the next `emit` only.
    pub fn compress(&self, value: bool) -> &Self {
        sio_core::lock(&self.inner).flags.compress = Some(value);
        self
    }

    /// One-shot: force binary/non-binary framing on the next `emit` only.
    pub fn binary(&self, value: bool) -> &Self {
        sio_core::lock(&self.inner).flags.binary = Some(value);
        self
    }

    /// One-shot: mark the next `emit` volatile — dropped rather than
    /// buffered if the socket is disconnected (supplemented feature,
    /// §3 SPEC_FULL supplements, reusing the same one-shot-flag machinery).
    pub fn volatile(&self) -> &Self {
        sio_core::lock(&self.inner).flags.volatile = true;
        self
    }

    fn send_packet(&self, mut packet: Packet) {
        packet.nsp = self.nsp.clone();
        self.manager._packet(packet);
    }

    /// Attach to the manager if detached; ensure the engine is opening
    /// (unless the manager is already reconnecting); run `onopen`
    /// immediately if the engine is already open (§4.E "connect/open").
    pub fn connect(&self) {
        if sio_core::lock(&self.inner).connected {
            return;
        }

        self.manager.mark_connecting(self as *const Socket as usize);
        self.sub_events();

        if self.manager.is_reconnecting() {
            return;
        }

        if self.manager.ready_state() == ReadyState::Open {
            self.onopen();
        } else {
            let manager = self.manager.clone();
            tokio::spawn(async move {
                let _ = manager.connect().await;
            });
        }
    }

    /// Alias of [`Socket::connect`].
    pub fn open(&self) {
        self.connect();
    }

    /// If connected, send a DISCONNECT packet; detach; synthesize a local
    /// `disconnect` with reason `"io client disconnect"` (§4.E "disconnect/close").
    pub fn disconnect(&self) {
        let connected = sio_core::lock(&self.inner).connected;
        if connected {
            let packet = Packet::new(PacketType::Disconnect, self.nsp.clone());
            self.send_packet(packet);
        }
        self.destroy();
        self.onclose("io client disconnect");
    }

    /// Alias of [`Socket::disconnect`].
    pub fn close(&self) {
        self.disconnect();
    }

    /// Subscribe to the manager's `open`/`packet`/`close` events (§4.E
    /// "Attach (subEvents)"). Idempotent.
    fn sub_events(&self) {
        {
            let inner = sio_core::lock(&self.inner);
            if inner.subs.is_some() {
                return;
            }
        }

        let weak = self.self_weak.clone();
        let sub = self.manager.on(move |ev: ManagerEvent| {
            let Some(socket) = weak.upgrade() else { return };
            match ev {
                ManagerEvent::Open => socket.onopen(),
                ManagerEvent::Packet(packet) => socket.onpacket(packet),
                ManagerEvent::Close(reason) => socket.onclose(&reason),
                _ => {}
            }
        });

        sio_core::lock(&self.inner).subs = Some(vec![sub]);
    }

    /// The CONNECT handshake (§4.E "Handshake (onopen on the socket)").
    fn onopen(&self) {
        match self.opts.auth.clone() {
            Auth::None => self.send_connect(Value::Null),
            Auth::Value(v) => self.send_connect(v),
            Auth::Provider(provider) => {
                let Some(socket) = self.self_weak.upgrade() else {
                    return;
                };
                provider(Box::new(move |v| socket.send_connect(v)));
            }
        }
    }

    fn send_connect(&self, auth: Value) {
        let mut packet = Packet::new(PacketType::Connect, self.nsp.clone()).with_data(auth);
        if let Some(query) = &self.opts.query {
            packet = packet.with_query(query.clone());
        }
        self.send_packet(packet);
    }

    /// Inbound dispatch (§4.E "Inbound dispatch (onpacket)").
    fn onpacket(&self, packet: Packet) {
        let is_root_error = packet.ptype == PacketType::Error && packet.nsp == "/";
        if packet.nsp != self.nsp && !is_root_error {
            return;
        }

        match packet.ptype {
            PacketType::Connect => self.onconnect(packet),
            PacketType::Event | PacketType::BinaryEvent => self.onevent(packet),
            PacketType::Ack | PacketType::BinaryAck => self.onack(packet),
            PacketType::Disconnect => self.ondisconnect(),
            PacketType::Error => self.onerror(packet),
        }
    }

    fn onconnect(&self, packet: Packet) {
        let sid = packet
            .data
            .as_ref()
            .and_then(|d| d.get("sid"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        {
            let mut inner = sio_core::lock(&self.inner);
            inner.id = sid;
            inner.connected = true;
            inner.disconnected = false;
        }

        self.dispatch_event("connect", &[], None);
        self.flush_buffers();
    }

    fn onevent(&self, packet: Packet) {
        let mut args = packet.args();
        if args.is_empty() {
            warn!("event packet with no arguments on {}, dropping", self.nsp);
            return;
        }
        let name = match args.remove(0) {
            EventArg::Json(Value::String(s)) => s,
            _ => {
                warn!("event packet's first argument is not a string, dropping");
                return;
            }
        };
        let ack_id = packet.id;

        let connected = sio_core::lock(&self.inner).connected;
        if connected {
            self.dispatch_event(&name, &args, ack_id);
        } else {
            self.inner
                .lock()
                .unwrap()
                .receive_buffer
                .push_back((name, args, ack_id));
        }
    }

    fn onack(&self, packet: Packet) {
        let Some(id) = packet.id else {
            warn!("ack packet missing id, dropping");
            return;
        };
        let cb = sio_core::lock(&self.inner).acks.remove(&id);
        match cb {
            Some(cb) => cb(packet.args()),
            None => debug!("no pending ack for id {id}, dropping"),
        }
    }

    fn ondisconnect(&self) {
        self.destroy();
        self.onclose("io server disconnect");
    }

    fn onerror(&self, packet: Packet) {
        let payload = packet.data.unwrap_or(Value::Null);
        self.dispatch_event("error", &[EventArg::Json(payload)], None);
    }

    /// On manager close (§4.E "On manager close -> socket onclose(reason)").
    /// Subscriptions deliberately survive so the socket auto-reattaches on
    /// the manager's next `open` (§9 design notes, documented quirk).
    fn onclose(&self, reason: &str) {
        {
            let mut inner = sio_core::lock(&self.inner);
            inner.connected = false;
            inner.disconnected = true;
            inner.id = None;
        }
        self.dispatch_event(
            "disconnect",
            &[EventArg::Json(Value::String(reason.to_string()))],
            None,
        );
    }

    /// Release subscriptions and tell the manager this socket has detached
    /// (§4.E "Detach (destroy)").
    fn destroy(&self) {
        let subs = sio_core::lock(&self.inner).subs.take();
        if let Some(subs) = subs {
            for sub in subs {
                sub.release();
            }
        }
        self.manager._destroy(self as *const Socket as usize);
    }

    /// Flush `receiveBuffer` then `sendBuffer`, in FIFO order (§4.E
    /// "Buffer flush (emitBuffered)").
    fn flush_buffers(&self) {
        let (receive, send) = {
            let mut inner = sio_core::lock(&self.inner);
            (
                std::mem::take(&mut inner.receive_buffer),
                std::mem::take(&mut inner.send_buffer),
            )
        };
        for (name, args, ack_id) in receive {
            self.dispatch_event(&name, &args, ack_id);
        }
        for packet in send {
            self.send_packet(packet);
        }
    }

    fn dispatch_event(&self, name: &str, args: &[EventArg], ack_id: Option<u64>) {
        let responder = ack_id.and_then(|id| {
            self.self_weak.upgrade().map(|socket| AckResponder {
                socket,
                id,
                fired: Arc::new(AtomicBool::new(false)),
            })
        });

        let handlers = {
            let map = sio_core::lock(&self.handlers);
            map.get(name).cloned()
        };
        let Some(handlers) = handlers else { return };
        for handler in handlers {
            handler(args, responder.clone());
        }
    }

    fn send_ack(&self, id: u64, args: Vec<EventArg>) {
        let packet = Packet::ack(self.nsp.clone(), id, args);
        self.send_packet(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TestConnector, TestEngine};
    use crate::manager::{Manager, ManagerOptions};
    use sio_protocol::{DefaultCodec, Encoder, Frame};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn setup() -> (Arc<Manager>, Arc<TestEngine>) {
        let engine = TestEngine::new();
        let connector = Arc::new(TestConnector::new(engine.clone()));
        let opts = ManagerOptions {
            auto_connect: false,
            ..Default::default()
        };
        (Manager::new("ws://localhost/", opts, connector), engine)
    }

    async fn open(manager: &Arc<Manager>, engine: &Arc<TestEngine>) {
        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.emit_open("engine-sid");
        handle.await.unwrap().unwrap();
    }

    fn connect_packet(sid: &str) -> Frame {
        let pkt = Packet::new(PacketType::Connect, "/").with_data(serde_json::json!({"sid": sid}));
        DefaultCodec.encode(&pkt).into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_socket_emits_connect_on_handshake() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());

        let connected = Arc::new(AtomicUsize::new(0));
        let connected2 = connected.clone();
        socket.on("connect", move |_, _| {
            connected2.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect();
        open(&manager, &engine).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        engine.emit_data(connect_packet("socket-sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert!(socket.connected());
        assert_eq!(socket.id(), Some("socket-sid".to_string()));
    }

    #[tokio::test]
    async fn test_id_cleared_on_disconnect() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());
        socket.connect();
        open(&manager, &engine).await;
        engine.emit_data(connect_packet("socket-sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(socket.id().is_some());

        socket.disconnect();
        assert!(socket.id().is_none());
        assert!(socket.disconnected());
    }

    #[tokio::test]
    async fn test_reserved_event_rejected() {
        let (manager, _engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());
        let err = socket.emit("disconnecting", vec![EventArg::Json("bye".into())]);
        assert!(err.is_err());
        assert!(err.unwrap_err().to_string().contains("\"disconnecting\" is a reserved event name"));
    }

    #[tokio::test]
    async fn test_emit_buffers_while_disconnected_then_flushes_in_order() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());

        socket.emit("a", vec![EventArg::Json(1.into())]).unwrap();
        socket.emit("b", vec![EventArg::Json(2.into())]).unwrap();

        socket.connect();
        open(&manager, &engine).await;
        engine.emit_data(connect_packet("sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = engine.sent();
        // First frame is the CONNECT handshake; the two buffered emits follow in order.
        let Frame::Text(a) = &sent[1].0 else { panic!() };
        let Frame::Text(b) = &sent[2].0 else { panic!() };
        assert!(a.contains("\"a\""));
        assert!(b.contains("\"b\""));
    }

    #[tokio::test]
    async fn test_receive_buffer_flushed_in_order_after_connect() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        socket.on("greet", move |args, _| {
            if let Some(EventArg::Json(Value::String(s))) = args.first() {
                received2.lock().unwrap().push(s.clone());
            }
        });

        socket.connect();

        // Simulate events arriving (via the manager's "packet" stream) before
        // the CONNECT handshake completes: they land in the receive buffer.
        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.emit_open("eid");
        handle.await.unwrap().unwrap();

        let pkt1 = Packet::event("/", "greet", vec![EventArg::Json("first".into())]);
        let pkt2 = Packet::event("/", "greet", vec![EventArg::Json("second".into())]);
        engine.emit_data(DefaultCodec.encode(&pkt1).into_iter().next().unwrap());
        engine.emit_data(DefaultCodec.encode(&pkt2).into_iter().next().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(received.lock().unwrap().is_empty());

        engine.emit_data(connect_packet("sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*received.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_compress_flag_is_one_shot() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());
        socket.connect();
        open(&manager, &engine).await;
        engine.emit_data(connect_packet("sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        socket.emit("a", vec![]).unwrap();
        socket.compress(false).emit("b", vec![]).unwrap();
        socket.emit("c", vec![]).unwrap();

        let sent = engine.sent();
        // sent[0] is CONNECT; a, b, c follow.
        assert!(sent[1].1);
        assert!(!sent[2].1);
        assert!(sent[3].1);
    }

    #[tokio::test]
    async fn test_ack_roundtrip() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());
        socket.connect();
        open(&manager, &engine).await;
        engine.emit_data(connect_packet("sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let got = Arc::new(Mutex::new(None));
        let got2 = got.clone();
        socket
            .emit_with_ack("getValue", vec![], move |args| {
                *got2.lock().unwrap() = args.into_iter().next();
            })
            .unwrap();

        let sent = engine.sent();
        let Frame::Text(header) = &sent[1].0 else { panic!() };
        assert!(header.starts_with("2"));

        let ack_pkt = Packet::ack("/", 0, vec![EventArg::Json(42.into())]);
        engine.emit_data(DefaultCodec.encode(&ack_pkt).into_iter().next().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(got.lock().unwrap().as_ref().unwrap().as_json().unwrap(), &serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_inbound_event_ack_fires_once() {
        let (manager, engine) = setup();
        let socket = manager.socket("/", SocketOptions::default());
        socket.connect();
        open(&manager, &engine).await;
        engine.emit_data(connect_packet("sid"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        socket.on("ping", |_, ack| {
            if let Some(ack) = ack {
                ack.call(vec![EventArg::Json("pong".into())]);
                ack.call(vec![EventArg::Json("pong-again".into())]);
            }
        });

        let pkt = Packet::event("/", "ping", vec![]).with_id(7);
        engine.emit_data(DefaultCodec.encode(&pkt).into_iter().next().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = engine.sent();
        let ack_frames: Vec<_> = sent
            .iter()
            .filter(|(f, _)| matches!(f, Frame::Text(t) if t.starts_with('3')))
            .collect();
        assert_eq!(ack_frames.len(), 1);
    }

    #[tokio::test]
    async fn test_root_namespace_error_reaches_custom_namespace() {
        let (manager, engine) = setup();
        let socket = manager.socket("/custom", SocketOptions::default());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors2 = errors.clone();
        socket.on("error", move |args, _| {
            if let Some(EventArg::Json(v)) = args.first() {
                errors2.lock().unwrap().push(v.clone());
            }
        });

        socket.connect();
        open(&manager, &engine).await;

        let err_pkt = Packet::new(PacketType::Error, "/").with_data(serde_json::json!("not authorized"));
        engine.emit_data(DefaultCodec.encode(&err_pkt).into_iter().next().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
