#![cfg_attr(docsrs, feature(doc_cfg))]
//! # vestwoods_lib
//!
//! This crate provides a library for reading Vestwoods BMS (Battery Management System)
//! devices over Bluetooth Low Energy.
//!
//! The protocol layers are pure functions over byte buffers:
//!
//! - [`protocol`] encodes the status request and extracts complete, checksum-valid frames
//!   from the notification stream.
//! - [`telemetry`] turns the status payload into a typed [`telemetry::Telemetry`] record,
//!   driven by the table in [`schedule`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `vestwoods-bms`
//!   bridge and pulls in `ble` and `serde`.
//! - `ble`: Enables the BLE transport using the `btleplug` crate.
//! - `serde`: Enables `Serialize` on the telemetry records.
//! - `bin-dependencies`: Enables all features required by the `vestwoods-bms` binary executable.
//!
//! ## Example
//!
//! ```
//! use vestwoods_lib::protocol;
//!
//! let request = protocol::encode_status_request();
//! assert_eq!(request, [0x7a, 0x00, 0x05, 0x00, 0x00, 0x01, 0x0c, 0xe5, 0xa7]);
//! assert_eq!(protocol::decode(&request[..4]), Err(vestwoods_lib::Error::Incomplete));
//! ```

/// Contains error types for the library.
mod error;
/// Defines the frame envelope of the Vestwoods BMS protocol.
pub mod protocol;
/// Layout of the status payload.
pub mod schedule;
/// Decoded status records.
pub mod telemetry;

pub use error::Error;

/// Asynchronous BLE transport for Vestwoods BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "ble")))]
#[cfg(feature = "ble")]
pub mod ble;
