//! Wire types for the AMT device gateway and the Redfish service.
//!
//! This crate contains the serde-serializable shapes exchanged with the
//! management gateway (power, redirection, AMT features, consent, relay
//! token, display selection) and the subset of the DMTF Redfish schema the
//! power-cycle orchestration reads and writes.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with the wire: field names follow the gateway/Redfish JSON exactly
//! * Lenient on input: optional and unknown fields default instead of failing
//!
//! Domain types (power states, session states, errors) are built on top of
//! these in `amt-session`.

pub mod device;
pub mod redfish;

pub use device::*;
pub use redfish::*;
