//! Basic Audio Profile unicast roles ([BAP] Section 5).
//!
//! [`Client`] drives remote ASEs through the ASE Control Point and creates
//! the CIS for every enabled stream. [`Server`] exposes local ASEs, forwards
//! every Control Point request to the application for confirmation, and
//! accepts CIS requests from the Client.
//!
//! Data path start and stop are decoupled from the Control Point. When an
//! ASE reaches a point where its data path should change, the role calls
//! `dp_update_req` and waits for `dp_update_cfm` from the application before
//! touching the Controller.
//!
//! [BAP]: https://www.bluetooth.com/specifications/specs/basic-audio-profile-1-0-1/

pub use {client::*, server::*};

use crate::ascs::{AseLid, AseState, CodecCfg, Direction, Opcode, QosCfg, QosPref, Rejection};
use crate::iso::{DataPathCfg, DpDirection, Role, StreamLid, DATA_PATH_HCI};
use crate::ltv::Ltv;
use crate::{gatt, iso, ConnLid};

mod client;
mod server;

#[cfg(test)]
mod tests;

/// Error type returned by the profile roles.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Iso(#[from] iso::Error),
    #[error(transparent)]
    Gatt(#[from] gatt::Error),
    #[error("invalid {0}")]
    InvalidAse(AseLid),
    #[error("{0} is not ready")]
    UnknownConn(ConnLid),
    #[error("{con} has no {dir} ASE with index {instance}")]
    InvalidInstance {
        con: ConnLid,
        dir: Direction,
        instance: u8,
    },
    #[error("{0} is already idle")]
    AlreadyIdle(AseLid),
    #[error("{op} rejected for {ase}: {rej}")]
    Rejected {
        ase: AseLid,
        op: Opcode,
        rej: Rejection,
    },
    #[error("{0} has no pending request")]
    NoRequest(AseLid),
    #[error("{0} is not bound to a stream")]
    NotBound(AseLid),
    #[error("role is not enabled")]
    NoRole,
    #[error("resource pool exhausted")]
    NoResources,
}

impl Error {
    /// Returns the protocol rejection, if the error carries one.
    #[inline]
    #[must_use]
    pub const fn rejection(&self) -> Option<Rejection> {
        match *self {
            Self::Rejected { rej, .. } => Some(rej),
            _ => None,
        }
    }
}

/// Common profile result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unicast Client configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default Control Point write type. Write Request is used if set.
    pub reliable: bool,
    /// Enable notifications for all ASCS characteristics on discovery.
    pub subscribe: bool,
    /// Maximum number of ASE records across all connections.
    pub max_ases: u16,
    /// Data path ID used for ISO data path setup.
    pub data_path_id: u8,
}

impl ClientConfig {
    /// Sets the default Control Point write type.
    #[inline(always)]
    #[must_use]
    pub const fn with_reliable(mut self, v: bool) -> Self {
        self.reliable = v;
        self
    }

    /// Sets whether notifications are enabled on discovery.
    #[inline(always)]
    #[must_use]
    pub const fn with_subscribe(mut self, v: bool) -> Self {
        self.subscribe = v;
        self
    }

    /// Sets the ASE pool size.
    #[inline(always)]
    #[must_use]
    pub const fn with_max_ases(mut self, n: u16) -> Self {
        self.max_ases = n;
        self
    }

    /// Sets the data path ID.
    #[inline(always)]
    #[must_use]
    pub const fn with_data_path_id(mut self, id: u8) -> Self {
        self.data_path_id = id;
        self
    }
}

impl Default for ClientConfig {
    #[inline]
    fn default() -> Self {
        Self {
            reliable: true,
            subscribe: true,
            max_ases: 8,
            data_path_id: DATA_PATH_HCI,
        }
    }
}

/// Unicast Server configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of Sink ASE characteristics.
    pub sink_ases: u8,
    /// Number of Source ASE characteristics.
    pub source_ases: u8,
    /// Maximum number of connected Clients.
    pub max_conns: u8,
    /// Data path ID used for ISO data path setup.
    pub data_path_id: u8,
}

impl ServerConfig {
    /// Sets the number of ASE characteristics per direction.
    #[inline(always)]
    #[must_use]
    pub const fn with_ases(mut self, sink: u8, source: u8) -> Self {
        self.sink_ases = sink;
        self.source_ases = source;
        self
    }

    /// Sets the maximum number of connected Clients.
    #[inline(always)]
    #[must_use]
    pub const fn with_max_conns(mut self, n: u8) -> Self {
        self.max_conns = n;
        self
    }

    /// Sets the data path ID.
    #[inline(always)]
    #[must_use]
    pub const fn with_data_path_id(mut self, id: u8) -> Self {
        self.data_path_id = id;
        self
    }

    /// Returns the total number of ASEs per connection.
    #[inline]
    #[must_use]
    pub const fn ases(&self) -> u8 {
        self.sink_ases.saturating_add(self.source_ases)
    }
}

impl Default for ServerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            sink_ases: 2,
            source_ases: 1,
            max_conns: 2,
            data_path_id: DATA_PATH_HCI,
        }
    }
}

/// Unicast Client application callbacks.
pub trait ClientCallbacks: Send {
    /// Called when ASCS discovery and the initial ASE reads complete.
    fn discovered(&mut self, con: ConnLid, r: Result<gatt::Service>);

    /// Called when a Control Point operation completes, successfully or not.
    fn cp_complete(&mut self, ase: AseLid, op: Opcode, r: Result<()>);

    /// Called when an ASE changes state. `con` is [`None`] if the ASE was
    /// forced to Idle by connection loss.
    fn ase_state(&mut self, _ase: AseLid, _con: Option<ConnLid>, _state: AseState) {}

    /// Called when the server reports a codec configuration. The codec
    /// specific configuration is passed through unchanged.
    fn codec_configured(&mut self, _ase: AseLid, _codec: &CodecCfg, _pref: &QosPref) {}

    /// Called when the server reports a QoS configuration.
    fn qos_configured(&mut self, _ase: AseLid, _qos: &QosCfg, _stream: Option<StreamLid>) {}

    /// Called when the ASE metadata changes.
    fn metadata(&mut self, _ase: AseLid, _md: &Ltv) {}

    /// Called when the data path of an ASE should be started or stopped.
    /// Must be answered with `Stack::cli_dp_update_cfm`.
    fn dp_update_req(&mut self, ase: AseLid, start: bool);
}

/// Unicast Server application callbacks. Every `*_req` method must be
/// answered exactly once with the corresponding `*_cfm` method before the
/// ASE can accept further operations.
pub trait ServerCallbacks: Send {
    /// Called for a Config Codec request. Answered with
    /// `Stack::srv_configure_codec_cfm`.
    fn configure_codec_req(&mut self, ase: AseLid, con: ConnLid, dir: Direction, codec: &CodecCfg);

    /// Called for a Config QoS request.
    fn configure_qos_req(&mut self, ase: AseLid, qos: &QosCfg);

    /// Called for an Enable request.
    fn enable_req(&mut self, ase: AseLid, md: &Ltv);

    /// Called for an Update Metadata request.
    fn update_metadata_req(&mut self, ase: AseLid, md: &Ltv);

    /// Called for a Disable request.
    fn disable_req(&mut self, ase: AseLid);

    /// Called for a Release request.
    fn release_req(&mut self, ase: AseLid);

    /// Called when the data path of an ASE should be started or stopped.
    fn dp_update_req(&mut self, ase: AseLid, start: bool);

    /// Called when an ASE changes state. `con` is [`None`] if the ASE was
    /// forced to Idle by connection loss.
    fn ase_state(&mut self, _ase: AseLid, _con: Option<ConnLid>, _state: AseState) {}
}

/// Returns the data path direction used by an ASE of type `dir` in the
/// specified role. The Client transmits to Sink ASEs and the Server
/// transmits from Source ASEs.
#[inline]
#[must_use]
pub(crate) const fn dp_dir(role: Role, dir: Direction) -> DpDirection {
    match (role, dir) {
        (Role::Central, Direction::Sink) | (Role::Peripheral, Direction::Source) => {
            DpDirection::Input
        }
        (Role::Central, Direction::Source) | (Role::Peripheral, Direction::Sink) => {
            DpDirection::Output
        }
    }
}

/// Returns the ASE direction that uses data path `dp` in the specified role.
#[inline]
#[must_use]
pub(crate) const fn ase_dir(role: Role, dp: DpDirection) -> Direction {
    match (role, dp) {
        (Role::Central, DpDirection::Input) | (Role::Peripheral, DpDirection::Output) => {
            Direction::Sink
        }
        (Role::Central, DpDirection::Output) | (Role::Peripheral, DpDirection::Input) => {
            Direction::Source
        }
    }
}

/// Returns the data path configuration for an ASE codec. Transcoding is
/// never requested from the Controller.
#[must_use]
pub(crate) fn dp_cfg(path_id: u8, codec: Option<&CodecCfg>) -> DataPathCfg {
    DataPathCfg {
        path_id,
        ctl_delay_us: codec.map_or(0, |c| c.ctl_delay_us),
        ..DataPathCfg::hci()
    }
}
