//! The Manager (§4.D): owns the engine transport, routes decoded packets,
//! drives the reconnection state machine, and multiplexes namespace sockets.
//!
//! Reconnection config lives in the live-mutable [`ManagerOptions`], the
//! backoff computation is the standalone [`crate::backoff::Backoff`], and
//! events fan out over a `tokio::sync::broadcast`-backed [`ManagerEvent`]
//! stream any number of listeners (including every attached
//! [`crate::socket::Socket`]) can subscribe to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use sio_core::constants::{
    DEFAULT_ENGINE_PATH, DEFAULT_RANDOMIZATION_FACTOR, DEFAULT_RECONNECTION_DELAY_MAX_MS,
    DEFAULT_RECONNECTION_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
use sio_core::error::{SioError, SioResult};
use sio_protocol::{DefaultCodec, Decoder, Encoder, Packet, PacketType, StreamDecoder};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::engine::{Engine, EngineConnector, EngineEvent, EngineOptions};
use crate::socket::{Socket, SocketOptions};
use crate::subscription::{subscribe, Subscription};

/// Manager lifecycle state (§3.3, §4.D state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Closed,
    Opening,
    Open,
}

/// Construction-time configuration (§6.3), live-mutable afterward through
/// the paired getter/setter methods on [`Manager`] — the Rust rendering of
/// the source's single overloaded accessor, as a typed struct with a
/// `Default` impl rather than an untyped options bag.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub path: String,
    pub reconnection: bool,
    /// `None` means unbounded, mirroring the source's `Infinity`.
    pub reconnection_attempts: Option<u32>,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    pub randomization_factor: f64,
    /// `None` disables the connect-phase timeout.
    pub timeout: Option<Duration>,
    pub auto_connect: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_ENGINE_PATH.to_string(),
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: Duration::from_millis(DEFAULT_RECONNECTION_DELAY_MS),
            reconnection_delay_max: Duration::from_millis(DEFAULT_RECONNECTION_DELAY_MAX_MS),
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            auto_connect: true,
        }
    }
}

/// Events the Manager emits (§6.5).
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Open,
    Close(String),
    Error(String),
    Ping,
    Packet(Packet),
    ConnectError(String),
    ReconnectAttempt(u32),
    Reconnecting(u32),
    Reconnect(u32),
    ReconnectError(String),
    ReconnectFailed,
}

struct ManagerState {
    ready_state: ReadyState,
    reconnecting: bool,
    skip_reconnect: bool,
    opts: ManagerOptions,
    engine: Option<Arc<dyn Engine>>,
    decoder: Box<dyn Decoder>,
    nsps: HashMap<String, Weak<Socket>>,
    connecting: HashSet<usize>,
    subs: Vec<Subscription>,
    backoff: Backoff,
}

/// Owns one engine transport and every namespace [`Socket`] multiplexed
/// over it (§4.D).
pub struct Manager {
    uri: String,
    connector: Arc<dyn EngineConnector>,
    encoder: Arc<dyn Encoder>,
    events_tx: broadcast::Sender<ManagerEvent>,
    self_weak: Weak<Manager>,
    state: Mutex<ManagerState>,
}

impl Manager {
    pub fn new(
        uri: impl Into<String>,
        opts: ManagerOptions,
        connector: Arc<dyn EngineConnector>,
    ) -> Arc<Self> {
        let uri = uri.into();
        let (events_tx, _) = broadcast::channel(512);
        let backoff = Backoff::new(
            opts.reconnection_delay,
            opts.reconnection_delay_max,
            opts.randomization_factor,
        );
        let auto_connect = opts.auto_connect;

        let manager = Arc::new_cyclic(|weak| Manager {
            uri,
            connector,
            encoder: Arc::new(DefaultCodec),
            events_tx,
            self_weak: weak.clone(),
            state: Mutex::new(ManagerState {
                ready_state: ReadyState::Closed,
                reconnecting: false,
                skip_reconnect: false,
                opts,
                engine: None,
                decoder: Box::new(StreamDecoder::new()),
                nsps: HashMap::new(),
                connecting: HashSet::new(),
                subs: Vec::new(),
                backoff,
            }),
        });

        if auto_connect {
            let m = manager.clone();
            tokio::spawn(async move {
                let _ = m.connect().await;
            });
        }

        manager
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn ready_state(&self) -> ReadyState {
        sio_core::lock(&self.state).ready_state
    }

    pub fn is_reconnecting(&self) -> bool {
        sio_core::lock(&self.state).reconnecting
    }

    /// The currently attached engine transport, if any (§3 supplemented
    /// feature: a `Manager::engine()` accessor). Exposes the full [`Engine`]
    /// surface (`write`/`close`/`events`), not just its id.
    pub fn engine(&self) -> Option<Arc<dyn Engine>> {
        sio_core::lock(&self.state).engine.clone()
    }

    /// The currently attached engine's id, if any (used by callers that
    /// need `manager.engine_id()` to differ from `socket.id()`, §8.3.1).
    /// A thin convenience over [`Manager::engine`].
    pub fn engine_id(&self) -> Option<String> {
        self.engine().and_then(|e| e.id())
    }

    /// Attempts remaining before `reconnect_failed` fires, or `None` if
    /// reconnection is unbounded.
    pub fn reconnection_attempts_remaining(&self) -> Option<u32> {
        let state = sio_core::lock(&self.state);
        state
            .opts
            .reconnection_attempts
            .map(|cap| cap.saturating_sub(state.backoff.attempts()))
    }

    /// Subscribe to Manager events (§6.5), wrapped in a [`Subscription`] so
    /// it composes with the rest of the crate's bulk-unsubscribe discipline.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(ManagerEvent) + Send + 'static,
    {
        subscribe(self.events_tx.subscribe(), handler)
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events_tx.send(event);
    }

    // ---- Config accessors (§4.D "single-method overloaded accessor") ----

    pub fn reconnection(&self) -> bool {
        sio_core::lock(&self.state).opts.reconnection
    }

    pub fn set_reconnection(&self, value: bool) -> &Self {
        sio_core::lock(&self.state).opts.reconnection = value;
        self
    }

    pub fn reconnection_attempts(&self) -> Option<u32> {
        sio_core::lock(&self.state).opts.reconnection_attempts
    }

    pub fn set_reconnection_attempts(&self, value: Option<u32>) -> &Self {
        sio_core::lock(&self.state).opts.reconnection_attempts = value;
        self
    }

    pub fn reconnection_delay(&self) -> Duration {
        sio_core::lock(&self.state).opts.reconnection_delay
    }

    pub fn set_reconnection_delay(&self, value: Duration) -> &Self {
        let mut state = sio_core::lock(&self.state);
        state.opts.reconnection_delay = value;
        state.backoff.set_min(value);
        self
    }

    pub fn reconnection_delay_max(&self) -> Duration {
        sio_core::lock(&self.state).opts.reconnection_delay_max
    }

    pub fn set_reconnection_delay_max(&self, value: Duration) -> &Self {
        let mut state = sio_core::lock(&self.state);
        state.opts.reconnection_delay_max = value;
        state.backoff.set_max(value);
        self
    }

    pub fn randomization_factor(&self) -> f64 {
        sio_core::lock(&self.state).opts.randomization_factor
    }

    pub fn set_randomization_factor(&self, value: f64) -> &Self {
        let mut state = sio_core::lock(&self.state);
        state.opts.randomization_factor = value;
        state.backoff.set_jitter(value);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        sio_core::lock(&self.state).opts.timeout
    }

    pub fn set_timeout(&self, value: Option<Duration>) -> &Self {
        sio_core::lock(&self.state).opts.timeout = value;
        self
    }

    // ---- Open / connect (§4.D "Open procedure") ----

    /// Transition from `closed` to `opening`/`open`. Equivalent to the
    /// source's `open(cb)` called without a callback: a failure here falls
    /// through to `maybeReconnectOnOpen` rather than being reported solely
    /// to a caller-supplied callback.
    pub async fn connect(&self) -> SioResult<()> {
        self.open_internal(false).await
    }

    /// Alias of [`Manager::connect`] (§4.D).
    pub async fn open(&self) -> SioResult<()> {
        self.connect().await
    }

    /// Drives the connector-dial + open-or-timeout race on a separate,
    /// abortable task recorded in `subs` (§4.D step 4: "each subscription
    /// and the timer are recorded in `subs` so `cleanup()` releases them
    /// all"). This is what makes an explicit `_close()` during `opening`
    /// (§8.3 scenario 3) actually cancel a pending connect-timeout instead
    /// of letting it fire and report a stale `connect_error` after the
    /// caller has already disconnected.
    async fn open_internal(&self, has_cb: bool) -> SioResult<()> {
        {
            let state = sio_core::lock(&self.state);
            if matches!(state.ready_state, ReadyState::Opening | ReadyState::Open) {
                return Ok(());
            }
        }

        let (engine_opts, timeout) = {
            let mut state = sio_core::lock(&self.state);
            state.ready_state = ReadyState::Opening;
            state.skip_reconnect = false;
            (
                EngineOptions {
                    path: state.opts.path.clone(),
                    headers: Vec::new(),
                },
                state.opts.timeout,
            )
        };

        let manager = self
            .self_weak
            .upgrade()
            .expect("manager dropped while still in use");
        let connector = self.connector.clone();
        let uri = self.uri.clone();
        let (done_tx, done_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let attempt = async {
                let engine = connector.connect(&uri, &engine_opts).await?;
                let mut events = engine.events();
                let wait = wait_for_open_or_error(&mut events);
                let result = match timeout {
                    Some(t) => tokio::time::timeout(t, wait)
                        .await
                        .unwrap_or_else(|_| Err(SioError::Timeout("timeout".into()))),
                    None => wait.await,
                };
                result.map(|()| engine)
            }
            .await;

            let outcome = match attempt {
                Ok(engine) => {
                    manager.onopen(engine);
                    Ok(())
                }
                Err(e) => manager.on_open_failure(e, has_cb),
            };
            let _ = done_tx.send(outcome);
        });
        self.state
            .lock()
            .unwrap()
            .subs
            .push(Subscription::from_handle(handle));

        // If `_close()` runs concurrently and tears this task down mid-flight
        // (via `cleanup()` releasing the subscription above), `done_tx` is
        // dropped without sending: report cancellation without emitting any
        // connect-error, matching the "explicit disconnect wins" behavior.
        done_rx
            .await
            .unwrap_or_else(|_| Err(SioError::Internal("connect attempt cancelled".into())))
    }

    fn on_open_failure(&self, e: SioError, has_cb: bool) -> SioResult<()> {
        self.cleanup();
        sio_core::lock(&self.state).ready_state = ReadyState::Closed;
        warn!("manager connect failed: {e}");
        self.emit(ManagerEvent::ConnectError(e.to_string()));
        if !has_cb {
            self.maybe_reconnect_on_open();
        }
        Err(e)
    }

    fn maybe_reconnect_on_open(&self) {
        let should = {
            let state = sio_core::lock(&self.state);
            !state.reconnecting && state.opts.reconnection && !state.skip_reconnect
        };
        if should {
            self.reconnect();
        }
    }

    /// Release every tracked subscription and reset the decoder (§4.D
    /// `cleanup()`, §8.1 "after `cleanup()`, `subs` is empty").
    fn cleanup(&self) {
        let mut state = sio_core::lock(&self.state);
        let subs = std::mem::take(&mut state.subs);
        state.decoder.destroy();
        drop(state);
        for sub in subs {
            sub.release();
        }
    }

    fn onopen(&self, engine: Arc<dyn Engine>) {
        self.cleanup();
        {
            let mut state = sio_core::lock(&self.state);
            state.ready_state = ReadyState::Open;
            state.engine = Some(engine.clone());
        }
        info!("manager open, engine id={:?}", engine.id());
        self.emit(ManagerEvent::Open);

        let weak = self.self_weak.clone();
        let sub = subscribe(engine.events(), move |ev: EngineEvent| {
            if let Some(manager) = weak.upgrade() {
                manager.on_engine_event(ev);
            }
        });

        sio_core::lock(&self.state).subs = vec![sub];
    }

    fn on_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Open => {}
            EngineEvent::Ping => self.emit(ManagerEvent::Ping),
            EngineEvent::Error(err) => self.emit(ManagerEvent::Error(err)),
            EngineEvent::Close(reason) => self.onclose(reason),
            EngineEvent::Data(frame) => {
                let decoded = { sio_core::lock(&self.state).decoder.add(frame) };
                match decoded {
                    Ok(packets) => {
                        for packet in packets {
                            self.emit(ManagerEvent::Packet(packet));
                        }
                    }
                    Err(e) => warn!("packet decode error: {e}"),
                }
            }
        }
    }

    fn onclose(&self, reason: String) {
        self.cleanup();
        {
            let mut state = sio_core::lock(&self.state);
            state.backoff.reset();
            state.ready_state = ReadyState::Closed;
            state.engine = None;
        }
        info!("manager closed: {reason}");
        self.emit(ManagerEvent::Close(reason));

        let (should_reconnect, skip) = {
            let state = sio_core::lock(&self.state);
            (state.opts.reconnection, state.skip_reconnect)
        };
        if should_reconnect && !skip {
            self.reconnect();
        }
    }

    // ---- Outbound encode (§4.D "Outbound encode") ----

    pub(crate) fn _packet(&self, mut packet: Packet) {
        if packet.ptype == PacketType::Connect {
            if let Some(query) = packet.query.take() {
                packet.nsp = format!("{}?{}", packet.nsp, query);
            }
        }

        let engine = { sio_core::lock(&self.state).engine.clone() };
        let Some(engine) = engine else {
            debug!("_packet called with no engine attached, dropping packet");
            return;
        };

        let compress = packet.options.compress;
        for frame in self.encoder.encode(&packet) {
            engine.write(frame, compress);
        }
    }

    // ---- Multiplexing (§4.D "Multiplexing") ----

    pub fn socket(&self, nsp: &str, opts: SocketOptions) -> Arc<Socket> {
        {
            let state = sio_core::lock(&self.state);
            if let Some(weak) = state.nsps.get(nsp) {
                if let Some(existing) = weak.upgrade() {
                    return existing;
                }
            }
        }

        let manager_arc = self
            .self_weak
            .upgrade()
            .expect("manager dropped while still in use");
        let socket = Socket::new(manager_arc, nsp.to_string(), opts);

        {
            let mut state = sio_core::lock(&self.state);
            state.nsps.insert(nsp.to_string(), Arc::downgrade(&socket));
        }

        let auto_connect = sio_core::lock(&self.state).opts.auto_connect;
        if auto_connect {
            socket.connect();
        }

        socket
    }

    pub(crate) fn mark_connecting(&self, socket_ptr: usize) {
        sio_core::lock(&self.state).connecting.insert(socket_ptr);
    }

    pub(crate) fn _destroy(&self, socket_ptr: usize) {
        let should_close = {
            let mut state = sio_core::lock(&self.state);
            state.connecting.remove(&socket_ptr);
            state.connecting.is_empty()
        };
        if should_close {
            debug!("last connecting socket detached, closing engine");
            let engine = { sio_core::lock(&self.state).engine.clone() };
            if let Some(engine) = engine {
                engine.close();
            }
        }
    }

    // ---- Explicit close (§4.D "Explicit close") ----

    pub fn disconnect(&self) {
        self._close();
    }

    pub fn _close(&self) {
        let was_opening = {
            let mut state = sio_core::lock(&self.state);
            state.skip_reconnect = true;
            state.reconnecting = false;
            state.ready_state == ReadyState::Opening
        };
        if was_opening {
            // No engine `close` event will fire for a never-opened engine.
            self.cleanup();
        }

        let engine = {
            let mut state = sio_core::lock(&self.state);
            state.backoff.reset();
            state.ready_state = ReadyState::Closed;
            state.engine.take()
        };
        if let Some(engine) = engine {
            engine.close();
        }
    }

    // ---- Reconnect loop (§4.D "Reconnect loop") ----

    fn reconnect(&self) {
        {
            let state = sio_core::lock(&self.state);
            if state.reconnecting || state.skip_reconnect {
                return;
            }
        }

        let (attempts, cap) = {
            let state = sio_core::lock(&self.state);
            (state.backoff.attempts(), state.opts.reconnection_attempts)
        };

        if let Some(cap) = cap {
            if attempts >= cap {
                {
                    let mut state = sio_core::lock(&self.state);
                    state.backoff.reset();
                    state.reconnecting = false;
                }
                warn!("reconnect attempts exhausted ({attempts}/{cap})");
                self.emit(ManagerEvent::ReconnectFailed);
                return;
            }
        }

        let delay = {
            let mut state = sio_core::lock(&self.state);
            let d = state.backoff.duration();
            state.reconnecting = true;
            d
        };

        let weak = self.self_weak.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                manager.on_reconnect_timer().await;
            }
        });
        self.state
            .lock()
            .unwrap()
            .subs
            .push(Subscription::from_handle(handle));
    }

    async fn on_reconnect_timer(&self) {
        if sio_core::lock(&self.state).skip_reconnect {
            return;
        }

        let attempt = sio_core::lock(&self.state).backoff.attempts();
        self.emit(ManagerEvent::ReconnectAttempt(attempt));
        self.emit(ManagerEvent::Reconnecting(attempt));

        if sio_core::lock(&self.state).skip_reconnect {
            return;
        }

        match self.open_internal(true).await {
            Ok(()) => {
                let mut state = sio_core::lock(&self.state);
                state.reconnecting = false;
                state.backoff.reset();
                drop(state);
                info!("reconnected after {attempt} attempt(s)");
                self.emit(ManagerEvent::Reconnect(attempt));
            }
            Err(e) => {
                sio_core::lock(&self.state).reconnecting = false;
                self.reconnect();
                self.emit(ManagerEvent::ReconnectError(e.to_string()));
            }
        }
    }
}

async fn wait_for_open_or_error(
    events: &mut broadcast::Receiver<EngineEvent>,
) -> SioResult<()> {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Open) => return Ok(()),
            Ok(EngineEvent::Error(e)) => return Err(SioError::Engine(e)),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(SioError::Engine("engine closed before opening".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TestConnector, TestEngine};
    use sio_protocol::{EventArg, Frame};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn manager_with_test_engine() -> (Arc<Manager>, Arc<TestEngine>) {
        let engine = TestEngine::new();
        let connector = Arc::new(TestConnector::new(engine.clone()));
        let opts = ManagerOptions {
            auto_connect: false,
            ..Default::default()
        };
        (Manager::new("ws://localhost/", opts, connector), engine)
    }

    #[tokio::test]
    async fn test_open_transitions_to_open_on_engine_open() {
        let (manager, engine) = manager_with_test_engine();
        assert_eq!(manager.ready_state(), ReadyState::Closed);

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.emit_open("sid-1");
        handle.await.unwrap().unwrap();

        assert_eq!(manager.ready_state(), ReadyState::Open);
        assert_eq!(manager.engine_id(), Some("sid-1".to_string()));
    }

    #[tokio::test]
    async fn test_engine_error_emits_connect_error() {
        let (manager, engine) = manager_with_test_engine();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _sub = manager.on(move |ev| {
            if matches!(ev, ManagerEvent::ConnectError(_)) {
                count2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.emit_error("boom");
        let result = handle.await.unwrap();

        assert!(result.is_err());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_data_frame_decodes_to_packet_event() {
        let (manager, engine) = manager_with_test_engine();
        let packets = Arc::new(Mutex::new(Vec::new()));
        let packets2 = packets.clone();
        let _sub = manager.on(move |ev| {
            if let ManagerEvent::Packet(p) = ev {
                packets2.lock().unwrap().push(p);
            }
        });

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.emit_open("sid-1");
        handle.await.unwrap().unwrap();

        let pkt = Packet::event("/", "hello", vec![EventArg::Json(serde_json::json!(1))]);
        let frame = DefaultCodec.encode(&pkt).into_iter().next().unwrap();
        engine.emit_data(frame);

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(packets.lock().unwrap().len(), 1);
        assert_eq!(packets.lock().unwrap()[0].ptype, PacketType::Event);
    }

    #[tokio::test]
    async fn test_disconnect_during_opening_suppresses_timeout_connect_error() {
        // §8.3 scenario 3: a connect-phase timeout that would otherwise fire
        // must not surface as `connect_error` once the caller has explicitly
        // disconnected — `_close()`'s cleanup() cancels the pending timeout.
        let (manager, _engine) = manager_with_test_engine();
        manager.set_timeout(Some(Duration::from_millis(100)));

        let errors = Arc::new(AtomicUsize::new(0));
        let errors2 = errors.clone();
        let _sub = manager.on(move |ev| {
            if matches!(ev, ManagerEvent::ConnectError(_)) {
                errors2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        manager.disconnect();
        let _ = handle.await;

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_disables_reconnect() {
        let (manager, engine) = manager_with_test_engine();
        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.emit_open("sid-1");
        handle.await.unwrap().unwrap();

        manager.disconnect();
        assert_eq!(manager.ready_state(), ReadyState::Closed);
        assert!(!manager.is_reconnecting());

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test]
    async fn test_reconnect_failed_after_attempts_exhausted() {
        let (manager, _engine) = manager_with_test_engine();
        manager.set_reconnection_attempts(Some(1));
        manager.set_reconnection_delay(Duration::from_millis(5));
        manager.set_reconnection_delay_max(Duration::from_millis(5));

        let failed = Arc::new(AtomicUsize::new(0));
        let failed2 = failed.clone();
        let _sub = manager.on(move |ev| {
            if matches!(ev, ManagerEvent::ReconnectFailed) {
                failed2.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Directly drive the private reconnect loop via repeated failed opens:
        // simulate by forcing backoff attempts past the cap.
        {
            let mut state = manager.state.lock().unwrap();
            state.backoff.duration();
        }
        manager.reconnect();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_setters_update_backoff() {
        let (manager, _engine) = manager_with_test_engine();
        manager.set_reconnection_delay(Duration::from_millis(10));
        manager.set_reconnection_delay_max(Duration::from_millis(20));
        manager.set_randomization_factor(0.0);
        assert_eq!(manager.reconnection_delay(), Duration::from_millis(10));
        assert_eq!(manager.reconnection_delay_max(), Duration::from_millis(20));
    }

    #[test]
    fn test_socket_identity_stable_across_calls() {
        let (manager, _engine) = manager_with_test_engine();
        let s1 = manager.socket("/chat", SocketOptions::default());
        let s2 = manager.socket("/chat", SocketOptions::default());
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn test_query_appended_only_to_connect_packet() {
        let (manager, engine) = manager_with_test_engine();

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect().await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.emit_open("sid-1");
        handle.await.unwrap().unwrap();

        let packet = Packet::new(PacketType::Connect, "/").with_query("token=abc");
        manager._packet(packet);
        let sent = engine.sent();
        let Frame::Text(header) = &sent[0].0 else {
            panic!("expected text frame")
        };
        assert!(header.contains("token=abc"));
    }
}
