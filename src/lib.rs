//! Blackrock User-Mode Bluetooth LE Audio library.
//!
//! Host-side implementation of the Basic Audio Profile ([BAP]) unicast roles on
//! top of the Audio Stream Control Service ([ASCS]) and LE Connected
//! Isochronous Channels ([Vol 6] Part B, Section 4.5.13).
//!
//! The crate is split into three layers that mirror the dependency order:
//!
//! * [`iso`] manages Connected Isochronous Groups and Streams and their data
//!   paths through the [`iso::Controller`] interface.
//! * [`ascs`] defines the Audio Stream Endpoint state machine and the ASE
//!   Control Point protocol.
//! * [`bap`] implements the unicast [`bap::Client`] and [`bap::Server`] roles.
//!
//! [`Stack`] owns all three and routes events between them. [`task`] drives a
//! [`Stack`] from a tokio task.
//!
//! [BAP]: https://www.bluetooth.com/specifications/specs/basic-audio-profile-1-0-1/
//! [ASCS]: https://www.bluetooth.com/specifications/specs/audio-stream-control-service-1-0/

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::assertions_on_result_states)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::empty_drop)]
#![warn(clippy::empty_structs_with_brackets)]
#![warn(clippy::exit)]
#![warn(clippy::format_push_string)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::if_then_some_else_none)]
#![warn(clippy::mod_module_files)]
#![warn(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![warn(clippy::rc_mutex)]
#![warn(clippy::str_to_string)]
#![warn(clippy::string_add)]
#![warn(clippy::todo)]
#![warn(clippy::try_err)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::unneeded_field_pattern)]

pub use stack::*;

#[path = "ascs/ascs.rs"]
pub mod ascs;
#[path = "bap/bap.rs"]
pub mod bap;
pub mod gatt;
#[path = "iso/iso.rs"]
pub mod iso;
pub mod ltv;
mod stack;
pub mod task;
#[path = "util/util.rs"]
mod util;

pub use util::{Arena, Lid};

/// Local index of an ACL connection assigned by the lower layers. The core
/// never allocates connection indices; it only references them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(serde::Deserialize, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnLid(pub u8);

impl std::fmt::Display for ConnLid {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnLid({})", self.0)
    }
}

#[cfg(test)]
type SyncMutex<T> = parking_lot::Mutex<T>;
