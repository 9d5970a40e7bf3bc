//! GAP Isochronous layer: Connected Isochronous Groups (CIG) and Streams (CIS)
//! ([Vol 6] Part B, Section 4.5.13 and [Vol 4] Part E, Section 7.8.97).
//!
//! [`Manager`] owns all group and stream records. Central groups are defined
//! by the Host with [`Manager::ug_add`] and committed to the Controller with
//! [`Manager::ug_config`]. Peripheral groups are created implicitly for CIG IDs
//! chosen by a peer Central. All Controller operations are asynchronous: the
//! Controller reports completions through the `Manager` event handlers, which
//! return [`Event`]s for the profile and application layers.

use std::fmt::Debug;

use smallvec::SmallVec;
use tracing::{debug, error, warn};

pub use {consts::*, datapath::*, group::*, handle::*, stream::*};

use crate::ascs::{AseLid, Direction};
use crate::{Arena, ConnLid};

mod consts;
mod datapath;
mod group;
mod handle;
mod stream;

#[cfg(test)]
pub(crate) mod tests;

/// Error type returned by the isochronous layer.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid {0}")]
    InvalidGroup(GroupLid),
    #[error("invalid {0}")]
    InvalidStream(StreamLid),
    #[error("invalid group parameters: {0:?}")]
    InvalidParams(GroupParams),
    #[error("CIG {0:#04X} already exists")]
    DuplicateGroup(u8),
    #[error("CIS {cis_id:#04X} already exists in {group}")]
    DuplicateStream { group: GroupLid, cis_id: u8 },
    #[error("{0} has active streams")]
    GroupBusy(GroupLid),
    #[error("{0} has member streams")]
    GroupNotEmpty(GroupLid),
    #[error("{0} has no member streams")]
    GroupEmpty(GroupLid),
    #[error("{0} is not committed")]
    GroupNotCommitted(GroupLid),
    #[error("{0} is in use")]
    StreamBusy(StreamLid),
    #[error("{stream} is {state}")]
    InvalidState { stream: StreamLid, state: StreamState },
    #[error("{0} is bound to another connection")]
    ConnMismatch(StreamLid),
    #[error("{dir:?} ASE slot of {stream} is occupied")]
    AseSlotBusy { stream: StreamLid, dir: Direction },
    #[error("{0} is managed by the peer")]
    PeerManaged(StreamLid),
    #[error("{dir} data path of {stream} is {state}")]
    DataPath {
        stream: StreamLid,
        dir: DpDirection,
        state: DpState,
    },
    #[error("resource pool exhausted")]
    NoResources,
    #[error("Controller error: {0}")]
    Controller(#[from] Status),
}

/// Common isochronous layer result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Local role in a CIG.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
pub enum Role {
    /// CIG created by the local Host (BAP Unicast Client).
    Central,
    /// CIG created by a peer Central (BAP Unicast Server).
    Peripheral,
}

/// Isochronous Controller interface. All methods submit an operation and
/// return immediately. An error means that the operation was not started.
pub trait Controller: Debug + Send {
    /// Sets CIG parameters for all member streams
    /// ([Vol 4] Part E, Section 7.8.97). Completion is reported via
    /// [`Manager::cig_configured`].
    fn set_cig_params(&mut self, cig_id: u8, p: &GroupParams, cis: &[(u8, StreamParams)])
        -> Result<()>;

    /// Removes a committed CIG ([Vol 4] Part E, Section 7.8.100).
    fn remove_cig(&mut self, cig_id: u8) -> Result<()>;

    /// Creates a CIS over ACL connection `con` ([Vol 4] Part E, Section
    /// 7.8.99). Completion is reported via [`Manager::cis_established`].
    fn create_cis(&mut self, cig_id: u8, cis_id: u8, con: ConnLid) -> Result<()>;

    /// Accepts a CIS request ([Vol 4] Part E, Section 7.8.101).
    fn accept_cis(&mut self, hdl: ConnHandle) -> Result<()>;

    /// Rejects a CIS request ([Vol 4] Part E, Section 7.8.102).
    fn reject_cis(&mut self, hdl: ConnHandle, reason: Status) -> Result<()>;

    /// Disconnects an established CIS. Completion is reported via
    /// [`Manager::cis_disconnected`].
    fn disconnect(&mut self, hdl: ConnHandle, reason: Status) -> Result<()>;

    /// Sets up an ISO data path ([Vol 4] Part E, Section 7.8.109).
    fn setup_data_path(&mut self, hdl: ConnHandle, dir: DpDirection, cfg: &DataPathCfg)
        -> Result<()>;

    /// Removes an ISO data path ([Vol 4] Part E, Section 7.8.110).
    fn remove_data_path(&mut self, hdl: ConnHandle, dir: DpDirection) -> Result<()>;
}

/// Application callbacks for isochronous events.
pub trait Callbacks: Send {
    /// Called when a peer Central requests a CIS for a configured stream. The
    /// request is accepted if this method returns `true`.
    fn establish_req(&mut self, stream: StreamLid, con: ConnLid, cig_id: u8, cis_id: u8) -> bool;

    /// Called when a CIG commit completes.
    fn group_configured(&mut self, _group: GroupLid, _status: Status) {}

    /// Called when a CIS is established.
    fn enabled(&mut self, _stream: StreamLid, _hdl: ConnHandle, _cfg: &CisConfig) {}

    /// Called when a CIS fails to be established or is lost.
    fn disabled(&mut self, _stream: StreamLid, _reason: Status) {}

    /// Called when a data path setup (`setup == true`) or removal completes.
    fn dp_updated(&mut self, _stream: StreamLid, _dir: DpDirection, _setup: bool, _st: Status) {}
}

/// Isochronous event reported by the [`Manager`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    GroupConfigured {
        group: GroupLid,
        status: Status,
    },
    /// CIS request that must be answered with [`Manager::establish_cfm`].
    EstablishReq {
        stream: StreamLid,
        con: ConnLid,
        cig_id: u8,
        cis_id: u8,
    },
    Enabled {
        stream: StreamLid,
        hdl: ConnHandle,
        cfg: CisConfig,
    },
    /// CIS failed to be established or was lost. The stream record may have
    /// been removed if it has no bound ASEs.
    Disabled {
        stream: StreamLid,
        reason: Status,
    },
    DataPath {
        stream: StreamLid,
        dir: DpDirection,
        setup: bool,
        status: Status,
    },
}

impl Event {
    /// Returns the stream that the event refers to.
    #[inline]
    #[must_use]
    pub const fn stream(&self) -> Option<StreamLid> {
        match *self {
            Self::GroupConfigured { .. } => None,
            Self::EstablishReq { stream, .. }
            | Self::Enabled { stream, .. }
            | Self::Disabled { stream, .. }
            | Self::DataPath { stream, .. } => Some(stream),
        }
    }

    /// Delivers the event to application callbacks. `EstablishReq` is not
    /// delivered because it requires an answer.
    pub fn notify(&self, cb: &mut dyn Callbacks) {
        match *self {
            Self::GroupConfigured { group, status } => cb.group_configured(group, status),
            Self::EstablishReq { .. } => {}
            Self::Enabled { stream, hdl, cfg } => cb.enabled(stream, hdl, &cfg),
            Self::Disabled { stream, reason } => cb.disabled(stream, reason),
            Self::DataPath {
                stream,
                dir,
                setup,
                status,
            } => cb.dp_updated(stream, dir, setup, status),
        }
    }
}

/// Isochronous layer configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of groups, including peer-owned ones.
    pub max_groups: u16,
    /// Maximum number of streams.
    pub max_streams: u16,
}

impl Config {
    /// Sets the maximum number of groups.
    #[inline(always)]
    #[must_use]
    pub const fn with_max_groups(mut self, n: u16) -> Self {
        self.max_groups = n;
        self
    }

    /// Sets the maximum number of streams.
    #[inline(always)]
    #[must_use]
    pub const fn with_max_streams(mut self, n: u16) -> Self {
        self.max_streams = n;
        self
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            max_groups: 4,
            max_streams: 8,
        }
    }
}

/// Group and stream manager.
#[derive(Debug)]
pub struct Manager {
    ctl: Box<dyn Controller>,
    groups: Arena<Group>,
    streams: Arena<Stream>,
}

impl Manager {
    /// Reason used for Host-initiated CIS termination.
    const DISCONNECT_REASON: Status = Status::RemoteUserTerminatedConnection;
    /// Reason used to reject unexpected CIS requests.
    const REJECT_REASON: Status = Status::ConnectionRejectedDueToLimitedResources;

    /// Creates a new manager using Controller `ctl`.
    #[must_use]
    pub fn new(ctl: Box<dyn Controller>, cfg: &Config) -> Self {
        Self {
            ctl,
            groups: Arena::new(cfg.max_groups),
            streams: Arena::new(cfg.max_streams),
        }
    }

    /// Returns the group record.
    #[inline]
    #[must_use]
    pub fn group(&self, group: GroupLid) -> Option<&Group> {
        self.groups.get(group)
    }

    /// Returns the stream record.
    #[inline]
    #[must_use]
    pub fn stream(&self, stream: StreamLid) -> Option<&Stream> {
        self.streams.get(stream)
    }

    /// Returns the Central group with the specified CIG ID.
    #[must_use]
    pub fn find_group(&self, cig_id: u8) -> Option<GroupLid> {
        (self.groups).find(|g| g.role == Role::Central && g.cig_id == cig_id)
    }

    /// Returns the member stream of `group` with the specified CIS ID.
    #[must_use]
    pub fn find_stream(&self, group: GroupLid, cis_id: u8) -> Option<StreamLid> {
        let g = self.groups.get(group)?;
        (g.streams.iter().copied()).find(|&s| self.streams.get(s).map_or(false, |s| s.cis_id == cis_id))
    }

    /// Returns the stream with the specified CIS connection handle.
    #[must_use]
    pub fn find_by_hdl(&self, hdl: ConnHandle) -> Option<StreamLid> {
        self.streams.find(|s| s.hdl == Some(hdl))
    }

    /// Defines a new Central group. The group must be committed with
    /// [`Self::ug_config`] before any of its streams can be enabled.
    pub fn ug_add(&mut self, cig_id: u8, params: GroupParams) -> Result<GroupLid> {
        if !params.is_valid() {
            return Err(Error::InvalidParams(params));
        }
        if self.find_group(cig_id).is_some() {
            return Err(Error::DuplicateGroup(cig_id));
        }
        let lid = (self.groups)
            .insert(Group::new(cig_id, Role::Central, None, params))
            .ok_or(Error::NoResources)?;
        debug!("Added {lid} with CIG ID {cig_id:#04X}");
        Ok(lid)
    }

    /// Updates group timing parameters. This clears the commit, so the group
    /// must be configured again.
    pub fn ug_update(&mut self, group: GroupLid, params: GroupParams) -> Result<()> {
        if !params.is_valid() {
            return Err(Error::InvalidParams(params));
        }
        self.check_idle(group)?;
        let g = self.central_group_mut(group)?;
        g.params = params;
        g.invalidate();
        debug!("Updated {group} parameters");
        Ok(())
    }

    /// Commits group parameters to the Controller. Completion is reported as
    /// [`Event::GroupConfigured`].
    pub fn ug_config(&mut self, group: GroupLid) -> Result<()> {
        self.check_idle(group)?;
        let g = self.central_group(group)?;
        if g.streams.is_empty() {
            return Err(Error::GroupEmpty(group));
        }
        let cis: SmallVec<[(u8, StreamParams); 4]> = (g.streams.iter())
            .filter_map(|&s| self.streams.get(s))
            .map(|s| (s.cis_id, s.params))
            .collect();
        let (cig_id, params) = (g.cig_id, g.params);
        self.ctl.set_cig_params(cig_id, &params, &cis)?;
        self.central_group_mut(group)?.state = GroupState::Configuring;
        debug!("Configuring {group} with {} streams", cis.len());
        Ok(())
    }

    /// Removes a group without member streams.
    pub fn ug_remove(&mut self, group: GroupLid) -> Result<()> {
        let g = self.central_group(group)?;
        if !g.streams.is_empty() {
            return Err(Error::GroupNotEmpty(group));
        }
        if g.state == GroupState::Configuring {
            return Err(Error::GroupBusy(group));
        }
        let cig_id = g.cig_id;
        if g.in_ctl {
            if let Err(e) = self.ctl.remove_cig(cig_id) {
                error!("Failed to remove CIG {cig_id:#04X}: {e}");
            }
        }
        self.groups.remove(group);
        debug!("Removed {group}");
        Ok(())
    }

    /// Adds a stream to a Central group.
    pub fn us_add(&mut self, group: GroupLid, cis_id: u8, p: StreamParams) -> Result<StreamLid> {
        self.add_stream(group, cis_id, p, false)
    }

    /// Binds a stream to an ACL connection.
    pub fn us_bind(&mut self, stream: StreamLid, con: ConnLid) -> Result<()> {
        let s = self.stream_mut(stream)?;
        match s.state {
            StreamState::Unbound => {}
            StreamState::Configured if s.con == Some(con) => return Ok(()),
            StreamState::Disconnected if s.ase_sink.is_none() && s.ase_src.is_none() => {}
            StreamState::Configured | StreamState::Disconnected => {
                return Err(Error::ConnMismatch(stream))
            }
            state => return Err(Error::InvalidState { stream, state }),
        }
        s.con = Some(con);
        s.state = StreamState::Configured;
        debug!("Bound {stream} to {con}");
        Ok(())
    }

    /// Removes a stream that has no bound ASEs and no CIS.
    pub fn us_remove(&mut self, stream: StreamLid) -> Result<()> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        if !s.is_idle() {
            return Err(Error::StreamBusy(stream));
        }
        if (self.groups.get(s.group)).map_or(false, |g| g.state == GroupState::Configuring) {
            return Err(Error::GroupBusy(s.group));
        }
        self.remove_stream(stream);
        Ok(())
    }

    /// Creates the CIS of a bound Central stream. Completion is reported as
    /// [`Event::Enabled`] or [`Event::Disabled`].
    pub fn us_enable(&mut self, stream: StreamLid) -> Result<()> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        if s.role != Role::Central {
            return Err(Error::PeerManaged(stream));
        }
        let con = match (s.state, s.con) {
            (StreamState::Configured | StreamState::Disconnected, Some(con)) => con,
            (state, _) => return Err(Error::InvalidState { stream, state }),
        };
        let (group, cis_id) = (s.group, s.cis_id);
        let g = self.groups.get(group).ok_or(Error::InvalidGroup(group))?;
        if g.state != GroupState::Configured {
            return Err(Error::GroupNotCommitted(group));
        }
        self.ctl.create_cis(g.cig_id, cis_id, con)?;
        self.stream_mut(stream)?.state = StreamState::Establishing;
        debug!("Establishing {stream} (CIS ID {cis_id:#04X})");
        Ok(())
    }

    /// Disconnects the CIS of an established stream. Completion is reported as
    /// [`Event::Disabled`].
    pub fn us_disable(&mut self, stream: StreamLid) -> Result<()> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        let hdl = match (s.state, s.conhdl()) {
            (StreamState::Established, Some(hdl)) => hdl,
            (state, _) => return Err(Error::InvalidState { stream, state }),
        };
        if s.closing {
            return Ok(());
        }
        self.ctl.disconnect(hdl, Self::DISCONNECT_REASON)?;
        self.stream_mut(stream)?.closing = true;
        debug!("Disconnecting {stream}");
        Ok(())
    }

    /// Answers an [`Event::EstablishReq`].
    pub fn establish_cfm(&mut self, stream: StreamLid, accept: bool) -> Result<()> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        let hdl = match (s.role, s.state, s.hdl) {
            (Role::Peripheral, StreamState::Establishing, Some(hdl)) => hdl,
            (_, state, _) => return Err(Error::InvalidState { stream, state }),
        };
        let r = if accept {
            self.ctl.accept_cis(hdl)
        } else {
            self.ctl.reject_cis(hdl, Self::REJECT_REASON)
        };
        if !accept || r.is_err() {
            let s = self.stream_mut(stream)?;
            s.state = StreamState::Configured;
            s.hdl = None;
            debug!("Rejected CIS request for {stream}");
        }
        r
    }

    /// Sets up the data path for direction `dir` of an established stream.
    pub fn dp_setup(&mut self, stream: StreamLid, dir: DpDirection, cfg: &DataPathCfg) -> Result<()> {
        let hdl = self.dp_check(stream, dir, DpState::NotSetUp)?;
        self.ctl.setup_data_path(hdl, dir, cfg)?;
        self.stream_mut(stream)?.dp[dir.idx()] = DpState::SettingUp;
        debug!("Setting up {dir} data path of {stream}");
        Ok(())
    }

    /// Removes the data path for direction `dir` of an established stream.
    pub fn dp_remove(&mut self, stream: StreamLid, dir: DpDirection) -> Result<()> {
        let hdl = self.dp_check(stream, dir, DpState::SetUp)?;
        self.ctl.remove_data_path(hdl, dir)?;
        self.stream_mut(stream)?.dp[dir.idx()] = DpState::Removing;
        debug!("Removing {dir} data path of {stream}");
        Ok(())
    }

    /// Handles CIG configuration completion.
    pub fn cig_configured(&mut self, cig_id: u8, status: Status) -> Option<Event> {
        let group = self.find_group(cig_id)?;
        let g = self.groups.get_mut(group)?;
        if g.state != GroupState::Configuring {
            warn!("Unexpected CIG {cig_id:#04X} configuration status: {status}");
            return None;
        }
        g.state = if status.is_ok() {
            g.in_ctl = true;
            GroupState::Configured
        } else {
            error!("Failed to configure CIG {cig_id:#04X}: {status}");
            GroupState::Defined
        };
        Some(Event::GroupConfigured { group, status })
    }

    /// Handles a CIS request from a peer Central. Requests for unknown streams
    /// are rejected without producing an event.
    pub fn cis_request(&mut self, con: ConnLid, cig_id: u8, cis_id: u8, hdl: ConnHandle) -> Option<Event> {
        let stream = self.find_peer_stream(con, cig_id, cis_id).filter(|&s| {
            (self.streams.get(s)).map_or(false, |s| {
                matches!(s.state, StreamState::Configured | StreamState::Disconnected)
            })
        });
        let Some(stream) = stream else {
            warn!("Rejecting CIS request for unknown CIS {cig_id:#04X}/{cis_id:#04X}");
            if let Err(e) = self.ctl.reject_cis(hdl, Self::REJECT_REASON) {
                error!("Failed to reject CIS request: {e}");
            }
            return None;
        };
        let s = self.streams.get_mut(stream)?;
        s.state = StreamState::Establishing;
        s.hdl = Some(hdl);
        Some(Event::EstablishReq {
            stream,
            con,
            cig_id,
            cis_id,
        })
    }

    /// Handles CIS establishment completion.
    pub fn cis_established(
        &mut self,
        con: ConnLid,
        cig_id: u8,
        cis_id: u8,
        r: std::result::Result<(ConnHandle, CisConfig), Status>,
    ) -> Option<Event> {
        let stream = (self.find_group(cig_id).and_then(|g| self.find_stream(g, cis_id)))
            .filter(|&s| self.streams.get(s).map_or(false, |s| s.con == Some(con)))
            .or_else(|| self.find_peer_stream(con, cig_id, cis_id));
        let Some(stream) = stream else {
            warn!("CIS {cig_id:#04X}/{cis_id:#04X} established for unknown stream");
            return None;
        };
        let s = self.streams.get_mut(stream)?;
        if s.state != StreamState::Establishing {
            warn!("Unexpected CIS establishment for {stream} in {} state", s.state);
            return None;
        }
        match r {
            Ok((hdl, cfg)) => {
                s.state = StreamState::Established;
                s.closing = false;
                s.hdl = Some(hdl);
                s.cfg = Some(cfg);
                debug!("Established {stream} ({hdl})");
                Some(Event::Enabled { stream, hdl, cfg })
            }
            Err(reason) => {
                error!("Failed to establish {stream}: {reason}");
                s.reset();
                self.remove_if_unused(stream);
                Some(Event::Disabled { stream, reason })
            }
        }
    }

    /// Handles CIS disconnection.
    pub fn cis_disconnected(&mut self, hdl: ConnHandle, reason: Status) -> Option<Event> {
        let stream = self.find_by_hdl(hdl)?;
        let s = self.streams.get_mut(stream)?;
        debug!("Disconnected {stream} ({hdl}): {reason}");
        s.reset();
        self.remove_if_unused(stream);
        Some(Event::Disabled { stream, reason })
    }

    /// Handles data path setup or removal completion.
    pub fn dp_complete(&mut self, hdl: ConnHandle, dir: DpDirection, status: Status) -> Option<Event> {
        let stream = self.find_by_hdl(hdl)?;
        let s = self.streams.get_mut(stream)?;
        let Some((next, setup)) = s.dp[dir.idx()].complete(status.is_ok()) else {
            warn!("Unexpected {dir} data path completion for {stream}");
            return None;
        };
        s.dp[dir.idx()] = next;
        if !status.is_ok() {
            error!("{dir} data path operation failed for {stream}: {status}");
        }
        Some(Event::DataPath {
            stream,
            dir,
            setup,
            status,
        })
    }

    /// Handles ACL connection loss. All streams bound to the connection become
    /// disconnected and their data paths are implicitly removed.
    pub fn acl_disconnected(&mut self, con: ConnLid, reason: Status) -> Vec<Event> {
        let mut evts = Vec::new();
        for stream in self.streams.filter(|s| s.con == Some(con)) {
            let Some(s) = self.streams.get_mut(stream) else { continue };
            let was_active = s.state.is_active();
            s.reset();
            if was_active {
                debug!("{stream} lost with {con}");
                evts.push(Event::Disabled { stream, reason });
            }
            self.remove_if_unused(stream);
        }
        evts
    }

    /// Returns the stream for `cis_id` in a Central group, adding a new one if
    /// needed. Added streams are removed automatically once unused.
    pub(crate) fn central_stream(&mut self, group: GroupLid, cis_id: u8) -> Result<StreamLid> {
        match self.find_stream(group, cis_id) {
            Some(s) => Ok(s),
            None => self.add_stream(group, cis_id, StreamParams::default(), true),
        }
    }

    /// Returns the stream for a CIS chosen by peer Central `con`, creating the
    /// group and stream records if needed.
    pub(crate) fn peer_stream(&mut self, con: ConnLid, cig_id: u8, cis_id: u8) -> Result<StreamLid> {
        if let Some(s) = self.find_peer_stream(con, cig_id, cis_id) {
            return Ok(s);
        }
        let group = match (self.groups)
            .find(|g| g.role == Role::Peripheral && g.con == Some(con) && g.cig_id == cig_id)
        {
            Some(g) => g,
            None => (self.groups)
                .insert(Group::new(cig_id, Role::Peripheral, Some(con), GroupParams::default()))
                .ok_or(Error::NoResources)?,
        };
        let mut s = Stream::new(group, cis_id, Role::Peripheral, StreamParams::default());
        s.auto = true;
        s.con = Some(con);
        s.state = StreamState::Configured;
        let Some(stream) = self.streams.insert(s) else {
            self.remove_group_if_unused(group);
            return Err(Error::NoResources);
        };
        if let Some(g) = self.groups.get_mut(group) {
            g.streams.push(stream);
        }
        debug!("Added {stream} for peer CIS {cig_id:#04X}/{cis_id:#04X}");
        Ok(stream)
    }

    /// Binds an ASE of type `dir` to a stream over connection `con`, updating
    /// the stream parameters of the corresponding link direction. Central
    /// groups with active streams cannot be changed.
    pub(crate) fn bind_ase(
        &mut self,
        stream: StreamLid,
        con: ConnLid,
        dir: Direction,
        ase: AseLid,
        p: DirParams,
    ) -> Result<()> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        if s.role == Role::Central {
            self.check_idle(s.group)?;
        }
        if !s.is_free() && s.con != Some(con) {
            return Err(Error::ConnMismatch(stream));
        }
        if s.ase(dir).map_or(false, |a| a != ase) {
            return Err(Error::AseSlotBusy { stream, dir });
        }
        let group = s.group;
        let changed = s.params.dir(dir) != &p;
        let s = self.stream_mut(stream)?;
        *s.ase_mut(dir) = Some(ase);
        *s.params.dir_mut(dir) = p;
        s.con = Some(con);
        if matches!(s.state, StreamState::Unbound | StreamState::Disconnected) {
            s.state = StreamState::Configured;
        }
        if changed {
            if let Some(g) = self.groups.get_mut(group) {
                g.invalidate();
            }
        }
        debug!("Bound {dir:?} {ase} to {stream}");
        Ok(())
    }

    /// Returns an error if an ASE of type `dir` could not be bound to CIS
    /// `cis_id` of Central group `group` over connection `con`.
    pub(crate) fn check_bind(
        &self,
        group: GroupLid,
        cis_id: u8,
        con: ConnLid,
        dir: Direction,
        ase: AseLid,
    ) -> Result<()> {
        self.central_group(group)?;
        self.check_idle(group)?;
        let Some(stream) = self.find_stream(group, cis_id) else {
            return Ok(());
        };
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        if !s.is_free() && s.con != Some(con) {
            return Err(Error::ConnMismatch(stream));
        }
        if s.ase(dir).map_or(false, |a| a != ase) {
            return Err(Error::AseSlotBusy { stream, dir });
        }
        Ok(())
    }

    /// Unbinds an ASE from a stream. Automatically added streams are removed
    /// when they have no bound ASEs and no CIS. Returns whether the stream was
    /// removed.
    pub(crate) fn unbind_ase(&mut self, stream: StreamLid, ase: AseLid) -> bool {
        let Some(s) = self.streams.get_mut(stream) else {
            return false;
        };
        for slot in [&mut s.ase_sink, &mut s.ase_src] {
            if *slot == Some(ase) {
                *slot = None;
            }
        }
        debug!("Unbound {ase} from {stream}");
        self.remove_if_unused(stream)
    }

    /// Returns an error if any member stream of `group` is active or the group
    /// is being configured.
    fn check_idle(&self, group: GroupLid) -> Result<()> {
        let g = self.groups.get(group).ok_or(Error::InvalidGroup(group))?;
        let active = (g.streams.iter())
            .filter_map(|&s| self.streams.get(s))
            .any(|s| s.state.is_active());
        if active || g.state == GroupState::Configuring {
            return Err(Error::GroupBusy(group));
        }
        Ok(())
    }

    fn add_stream(&mut self, group: GroupLid, cis_id: u8, p: StreamParams, auto: bool) -> Result<StreamLid> {
        self.central_group(group)?;
        self.check_idle(group)?;
        if self.find_stream(group, cis_id).is_some() {
            return Err(Error::DuplicateStream { group, cis_id });
        }
        let mut s = Stream::new(group, cis_id, Role::Central, p);
        s.auto = auto;
        let stream = self.streams.insert(s).ok_or(Error::NoResources)?;
        let g = self.central_group_mut(group)?;
        g.streams.push(stream);
        g.invalidate();
        debug!("Added {stream} with CIS ID {cis_id:#04X} to {group}");
        Ok(stream)
    }

    fn remove_if_unused(&mut self, stream: StreamLid) -> bool {
        let unused = (self.streams.get(stream)).map_or(false, |s| s.auto && s.is_idle());
        if unused {
            self.remove_stream(stream);
        }
        unused
    }

    fn remove_stream(&mut self, stream: StreamLid) {
        let Some(s) = self.streams.remove(stream) else { return };
        if let Some(g) = self.groups.get_mut(s.group) {
            g.streams.retain(|&mut v| v != stream);
            g.invalidate();
        }
        debug!("Removed {stream}");
        self.remove_group_if_unused(s.group);
    }

    fn remove_group_if_unused(&mut self, group: GroupLid) {
        if (self.groups.get(group)).map_or(false, |g| g.role == Role::Peripheral && g.streams.is_empty()) {
            self.groups.remove(group);
            debug!("Removed peer {group}");
        }
    }

    /// Returns the stream for a CIS chosen by peer Central `con`.
    pub(crate) fn find_peer_stream(&self, con: ConnLid, cig_id: u8, cis_id: u8) -> Option<StreamLid> {
        self.streams.find(|s| {
            s.role == Role::Peripheral
                && s.con == Some(con)
                && s.cis_id == cis_id
                && self.groups.get(s.group).map_or(false, |g| g.cig_id == cig_id)
        })
    }

    fn dp_check(&self, stream: StreamLid, dir: DpDirection, want: DpState) -> Result<ConnHandle> {
        let s = self.stream(stream).ok_or(Error::InvalidStream(stream))?;
        let Some(hdl) = s.conhdl() else {
            return Err(Error::InvalidState {
                stream,
                state: s.state,
            });
        };
        let state = s.dp[dir.idx()];
        if state != want {
            return Err(Error::DataPath { stream, dir, state });
        }
        Ok(hdl)
    }

    fn central_group(&self, group: GroupLid) -> Result<&Group> {
        (self.groups.get(group))
            .filter(|g| g.role == Role::Central)
            .ok_or(Error::InvalidGroup(group))
    }

    fn central_group_mut(&mut self, group: GroupLid) -> Result<&mut Group> {
        (self.groups.get_mut(group))
            .filter(|g| g.role == Role::Central)
            .ok_or(Error::InvalidGroup(group))
    }

    fn stream_mut(&mut self, stream: StreamLid) -> Result<&mut Stream> {
        self.streams.get_mut(stream).ok_or(Error::InvalidStream(stream))
    }
}
