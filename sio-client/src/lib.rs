//! sio-client: the reconnecting, multiplexed messaging client built on top
//! of `sio-core` and `sio-protocol` — [`Subscription`] for scoped listener
//! registration, [`Backoff`] for reconnect delay generation, an [`Engine`]
//! transport contract with [`TestEngine`] and (feature `net`)
//! `WebSocketEngine`, [`Manager`] for the transport/reconnect state machine,
//! and [`Socket`] for namespace-scoped emit/on semantics.

pub mod backoff;
pub mod engine;
pub mod manager;
pub mod socket;
pub mod subscription;

pub use backoff::Backoff;
pub use engine::{Engine, EngineConnector, EngineEvent, EngineFactory, EngineOptions, TestConnector, TestEngine};
#[cfg(feature = "net")]
pub use engine::ws::{WebSocketConnector, WebSocketEngine};
pub use manager::{Manager, ManagerEvent, ManagerOptions, ReadyState};
pub use socket::{Auth, AckResponder, Socket, SocketOptions};
pub use subscription::{subscribe, Subscription};
