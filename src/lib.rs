//! dualnet-relay - store-and-forward MQTT bridge for dual-network nodes
//!
//! Telemetry published on a local broker (reached over a wired interface) is
//! republished to a remote broker (reached over a wireless interface). When
//! the remote path is down the most recent message is parked in a single-entry
//! fallback slot and redelivered once connectivity returns. Every attempt is
//! recorded in an append-only text log of hex-encoded payloads.
//!
//! # Overview
//!
//! - [`codec`]: hex transcoding of binary payloads
//! - [`storage`]: the append log and its record format
//! - [`relay`]: the relay engine, the fallback slot and the retry loop
//! - [`supervisor`]: link and broker connection supervision
//! - [`transport`]: MQTT broker links and network interface links
//!
//! # Quick Start
//!
//! ```rust
//! use dualnet_relay::codec;
//! use dualnet_relay::relay::FallbackSlot;
//! use dualnet_relay::storage::EncodedRecord;
//!
//! let slot = FallbackSlot::new();
//! slot.store(&[0xDE, 0xAD, 0xBE, 0xEF]);
//!
//! let record = EncodedRecord::from_payload(&[0xDE, 0xAD, 0xBE, 0xEF], false);
//! assert_eq!(record.to_line(), "false;DEADBEEF\n");
//!
//! let pending = slot.take_if_present().unwrap().unwrap();
//! assert_eq!(codec::encode(&pending.payload), "DEADBEEF");
//! assert!(slot.is_empty());
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod observability;
pub mod relay;
pub mod storage;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{RelayError, RelayResult};
pub use relay::{FallbackSlot, RelayEngine, RelayMessage, RelayOutcome, RetryLoop, TickOutcome};
pub use storage::{AppendLog, EncodedRecord, FileAppendLog};
pub use supervisor::{ConnectionSupervisor, LinkState, NetworkPath, RetryPolicy};
pub use transport::{BrokerLink, InboundHandler, MqttLink, NetworkLink};
