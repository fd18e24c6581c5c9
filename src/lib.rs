//! # Kiezbox Gateway
//!
//! Gateway service that bridges a Kiezbox mesh device (attached over a serial
//! line) to an InfluxDB time-series store and to local HTTP clients.
//!
//! The pipeline: bytes from the serial port are split into length-prefixed
//! protobuf frames (interleaved device debug text is drained to the log),
//! decoded into radio envelopes, and routed to typed channels. Status updates
//! are written to the store; while the store is unreachable they are spilled
//! to disk and replayed later. Periodic loops keep the link alive (heartbeat),
//! poll the device configuration, and push one-shot control commands such as
//! time synchronisation.
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - Serial link ownership, stream framing, envelope codec,
//!   and the inbound dispatcher
//! - [`control`] - Heartbeat / config-poll loops and control command builders
//! - [`db`] - Store client, point conversion, disk spill and retry sweeper
//! - [`api`] - Local HTTP surface for status and control
//! - [`state`] - Shared gateway state and the node-ready gate
//! - [`config`] - CLI/environment configuration
//! - [`protobuf`] - Generated schema types shared with the device firmware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiezbox_gateway::config::GatewayConfig;
//! use clap::Parser;
//!
//! let config = GatewayConfig::parse_from(["kiezbox-gateway", "--dbwriter"]);
//! assert_eq!(config.serial_baud, 115200);
//! ```

pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod logutil;
pub mod meshtastic;
pub mod protobuf;
pub mod state;
