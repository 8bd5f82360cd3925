//! # iec104_master
//!
//! IEC 60870-5-104 controlling-station (master) protocol engine.
//!
//! This crate implements the master side of the IEC 60870-5-104 telecontrol
//! protocol used by electric-utility SCADA systems to talk to substation
//! RTUs over TCP: the APCI link state machine (STARTDT/STOPDT/TESTFR,
//! supervisory acknowledgements, modulo-2^15 sequence numbering), bit-exact
//! ASDU encoding and decoding for 50 type identifiers, periodic
//! general-interrogation cycles, and primary/backup reconnection.
//!
//! ## Design
//!
//! The engine owns no socket and spawns no task. The host supplies a
//! [`Transport`] and drives the engine from its own event loop:
//!
//! - `on_connect_tcp()` / `on_disconnect_tcp()` on transport state changes
//! - `on_packet_ready()` when bytes are readable
//! - `on_timer_second()` once per second
//!
//! Decoded data and protocol milestones come back as [`MasterEvent`] values
//! on the channel returned by [`Iec104Master::subscribe`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use iec104_master::{CommandObject, Iec104Master, MasterConfig, MasterEvent};
//!
//! let mut config = MasterConfig::new("192.168.1.100");
//! config.common_address = 1;
//!
//! let mut master = Iec104Master::new(config, transport);
//! let mut events = master.subscribe().unwrap();
//!
//! // wire these into your socket/timer loop:
//! //   master.on_connect_tcp();
//! //   master.on_packet_ready();
//! //   master.on_timer_second();
//!
//! master.send_command(&CommandObject::single(42, true));
//!
//! while let Some(event) = events.recv().await {
//!     if let MasterEvent::DataIndication(points) = event {
//!         for p in points {
//!             println!("IOA {}: {} ({})", p.ioa, p.as_f64(), p.quality);
//!         }
//!     }
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 runs over TCP (default port 2404). Three frame formats
//! share the 6-byte APCI header:
//!
//! - **I-frame**: numbered information transfer (carries an ASDU)
//! - **S-frame**: supervisory acknowledgement
//! - **U-frame**: unnumbered control (STARTDT, STOPDT, TESTFR)
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod builder;
pub mod codec;
pub mod error;
pub mod master;
pub mod parser;
pub mod transport;
pub mod types;

// Re-export main types
pub use codec::{Apdu, Iec104Codec};
pub use error::{Iec104Error, Result};
pub use master::{Iec104Master, MasterConfig, MasterEvent, DEFAULT_PORT};
pub use parser::{parse_asdu, parse_command_response};
pub use transport::Transport;
pub use types::*;
