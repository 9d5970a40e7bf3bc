//! Audio Stream Control Service ([ASCS]).
//!
//! Each connection has one Control Point characteristic and one
//! characteristic per Audio Stream Endpoint (ASE). This module defines the ASE
//! record and its state machine ([`transition`]), the Control Point and ASE
//! value codecs, and the assigned numbers used by both. The client and server
//! roles that drive the state machine live in [`crate::bap`].
//!
//! [ASCS]: https://www.bluetooth.com/specifications/specs/audio-stream-control-service-1-0/

pub use {ase::*, consts::*, pdu::*};

mod ase;
mod consts;
mod pdu;

#[cfg(test)]
mod tests;
