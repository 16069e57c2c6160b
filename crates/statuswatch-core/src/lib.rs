// # statuswatch-core
//
// Core library for the StatusWatch server polling system.
//
// ## Architecture Overview
//
// This library provides everything needed to poll Minecraft Java servers and
// drive long-running per-target polling agents:
//
// - **protocol**: the length-prefixed wire codec, five transports sharing it,
//   the handshake/status/ping exchanges, and the forge mod-listing decoder
// - **Server**: a facade that resolves an address (SRV-aware), opens one
//   connection per exchange, and exposes `ping`/`status` with retries
// - **StateMachine / State**: named units of behavior with lifecycle hooks
// - **Gears**: a registry of recurring background tasks (`Timer`,
//   `StateTimer`) with graceful, bounded-latency shutdown
// - **Traits**: collaborator seams (`AddressProvider`, `Notifier`) consumed
//   by the core but implemented elsewhere
//
// ## Design Principles
//
// 1. **One connection per exchange**: every poll opens a fresh transport and
//    always closes it; servers may move between failures
// 2. **Bounded shutdown**: halting a gear or closing the registry completes
//    within a predictable multiple of the gear's tick delay
// 3. **Tolerant bit-decoding**: forge sub-format errors never fail a poll;
//    network and framing errors always surface to the caller

pub mod address;
pub mod config;
pub mod error;
pub mod gears;
pub mod machine;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod traits;

// Re-export core types for convenience
pub use config::{PollConfig, TargetConfig, WatchConfig};
pub use error::{Error, Result};
pub use gears::{Gear, Registry, RegistrySignals, StateTimer, Timer, TimerTick};
pub use machine::{State, StateMachine, Transition};
pub use protocol::connection::{
    AsyncConnection, AsyncTcpConnection, AsyncUdpConnection, Connection, MemoryConnection,
    TcpConnection, UdpConnection,
};
pub use protocol::forge::{ChannelInfo, ForgeData};
pub use protocol::pinger::{AsyncServerPinger, ServerPinger};
pub use server::Server;
pub use traits::{AddressProvider, Notifier};
