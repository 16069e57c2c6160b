//! Wire protocol support
//!
//! - [`connection`]: the shared length-prefixed binary codec and the five
//!   transports that carry it (in-memory, blocking TCP/UDP, async TCP/UDP)
//! - [`pinger`]: the handshake, status-query, and latency-probe exchanges
//! - [`forge`]: the bit-packed mod/channel listing embedded in one status
//!   document field

pub mod connection;
pub mod forge;
pub mod pinger;
