use std::fmt::{Debug, Formatter};

use tracing::{debug, error};

use crate::ascs::{AseLid, CodecCfg, Direction, QosCfg, QosPref, Rejection};
use crate::bap::{Client, ClientCallbacks, ClientConfig, Error, Result, Server, ServerCallbacks, ServerConfig};
use crate::gatt::{self, Chr, ErrorCode};
use crate::iso::{self, CisConfig, ConnHandle, DpDirection, Event, GroupLid, Manager, Role, Status};
use crate::ltv::Ltv;
use crate::ConnLid;

/// LE Audio unicast stack. Owns the isochronous channel manager and the
/// enabled profile roles, and routes lower layer events between them.
///
/// All methods return immediately. Completion of asynchronous operations is
/// reported through the application callbacks.
pub struct Stack {
    iso: Manager,
    cli: Option<Client>,
    srv: Option<Server>,
    app: Box<dyn iso::Callbacks>,
}

impl Debug for Stack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("iso", &self.iso)
            .field("cli", &self.cli)
            .field("srv", &self.srv)
            .finish_non_exhaustive()
    }
}

impl Stack {
    /// Creates a stack without any profile roles.
    #[must_use]
    pub fn new(ctl: Box<dyn iso::Controller>, cfg: &iso::Config, app: Box<dyn iso::Callbacks>) -> Self {
        Self {
            iso: Manager::new(ctl, cfg),
            cli: None,
            srv: None,
            app,
        }
    }

    /// Enables the Unicast Client role.
    #[must_use]
    pub fn with_client(mut self, cfg: ClientConfig, gatt: Box<dyn gatt::Client>, cb: Box<dyn ClientCallbacks>) -> Self {
        self.cli = Some(Client::new(cfg, gatt, cb));
        self
    }

    /// Enables the Unicast Server role.
    #[must_use]
    pub fn with_server(mut self, cfg: ServerConfig, gatt: Box<dyn gatt::Server>, cb: Box<dyn ServerCallbacks>) -> Self {
        self.srv = Some(Server::new(cfg, gatt, cb));
        self
    }

    /// Returns the isochronous channel manager.
    #[inline(always)]
    #[must_use]
    pub const fn iso(&self) -> &Manager {
        &self.iso
    }

    /// Returns the isochronous channel manager for group and stream
    /// management.
    #[inline(always)]
    pub fn iso_mut(&mut self) -> &mut Manager {
        &mut self.iso
    }

    #[inline(always)]
    #[must_use]
    pub const fn client(&self) -> Option<&Client> {
        self.cli.as_ref()
    }

    #[inline(always)]
    #[must_use]
    pub const fn server(&self) -> Option<&Server> {
        self.srv.as_ref()
    }

    // Unicast Client operations

    /// Discovers the ASCS instance of a connected Server.
    pub fn cli_discover(&mut self, con: ConnLid) -> Result<()> {
        self.cli_mut()?.discover(con)
    }

    /// Configures the codec of remote ASE `instance` of type `dir`.
    pub fn cli_configure_codec(&mut self, con: ConnLid, dir: Direction, instance: u8, codec: CodecCfg) -> Result<AseLid> {
        self.cli_mut()?.configure_codec(con, dir, instance, codec)
    }

    /// Configures QoS of an ASE, assigning it to a CIS of `group`.
    pub fn cli_configure_qos(&mut self, ase: AseLid, group: GroupLid, qos: QosCfg) -> Result<()> {
        let cli = self.cli.as_mut().ok_or(Error::NoRole)?;
        cli.configure_qos(&self.iso, ase, group, qos)
    }

    /// Enables an ASE. The CIS is created once the Server reports the
    /// Enabling state.
    pub fn cli_enable(&mut self, ase: AseLid, md: Ltv) -> Result<()> {
        let cli = self.cli.as_mut().ok_or(Error::NoRole)?;
        cli.enable(&self.iso, ase, md)
    }

    pub fn cli_update_metadata(&mut self, ase: AseLid, md: Ltv) -> Result<()> {
        self.cli_mut()?.update_metadata(ase, md)
    }

    pub fn cli_disable(&mut self, ase: AseLid) -> Result<()> {
        self.cli_mut()?.disable(ase)
    }

    pub fn cli_release(&mut self, ase: AseLid) -> Result<()> {
        self.cli_mut()?.release(ase)
    }

    /// Selects Write Request (`reliable`) or Write Command for Control Point
    /// operations on an ASE.
    pub fn cli_set_write_type(&mut self, ase: AseLid, reliable: bool) -> Result<()> {
        self.cli_mut()?.set_write_type(ase, reliable)
    }

    /// Answers [`ClientCallbacks::dp_update_req`].
    pub fn cli_dp_update_cfm(&mut self, ase: AseLid, accept: bool) -> Result<()> {
        let cli = self.cli.as_mut().ok_or(Error::NoRole)?;
        cli.dp_update_cfm(&mut self.iso, ase, accept)
    }

    // Unicast Server operations

    /// Answers [`ServerCallbacks::configure_codec_req`].
    pub fn srv_configure_codec_cfm(&mut self, ase: AseLid, r: std::result::Result<QosPref, Rejection>) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.configure_codec_cfm(&mut self.iso, ase, r)
    }

    /// Answers [`ServerCallbacks::configure_qos_req`].
    pub fn srv_configure_qos_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.configure_qos_cfm(&mut self.iso, ase, r)
    }

    /// Answers [`ServerCallbacks::enable_req`].
    pub fn srv_enable_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.enable_cfm(&self.iso, ase, r)
    }

    /// Answers [`ServerCallbacks::update_metadata_req`].
    pub fn srv_update_metadata_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>) -> Result<()> {
        self.srv_mut()?.update_metadata_cfm(ase, r)
    }

    /// Answers [`ServerCallbacks::disable_req`].
    pub fn srv_disable_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.disable_cfm(&mut self.iso, ase, r)
    }

    /// Answers [`ServerCallbacks::release_req`].
    pub fn srv_release_cfm(&mut self, ase: AseLid, r: std::result::Result<(), Rejection>, idle: bool) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.release_cfm(&mut self.iso, ase, r, idle)
    }

    /// Answers [`ServerCallbacks::dp_update_req`].
    pub fn srv_dp_update_cfm(&mut self, ase: AseLid, accept: bool) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.dp_update_cfm(&mut self.iso, ase, accept)
    }

    /// Configures the codec of a local ASE on connection `con`.
    pub fn srv_configure_codec(
        &mut self,
        con: ConnLid,
        dir: Direction,
        instance: u8,
        codec: CodecCfg,
        pref: QosPref,
    ) -> Result<AseLid> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.configure_codec(&mut self.iso, con, dir, instance, codec, pref)
    }

    pub fn srv_update_metadata(&mut self, ase: AseLid, md: Ltv) -> Result<()> {
        self.srv_mut()?.update_metadata(ase, md)
    }

    pub fn srv_disable(&mut self, ase: AseLid) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.disable(&mut self.iso, ase)
    }

    /// Releases a local ASE, leaving it Idle if `idle` is set or Codec
    /// Configured otherwise.
    pub fn srv_release(&mut self, ase: AseLid, idle: bool) -> Result<()> {
        let srv = self.srv.as_mut().ok_or(Error::NoRole)?;
        srv.release(&mut self.iso, ase, idle)
    }

    // GATT client transport

    /// Handles ASCS discovery completion.
    pub fn gatt_discovered(&mut self, con: ConnLid, r: gatt::Result<gatt::Service>) {
        if let Some(cli) = self.cli.as_mut() {
            cli.discovered(con, r);
        }
    }

    /// Handles characteristic read completion.
    pub fn gatt_read(&mut self, con: ConnLid, chr: Chr, r: gatt::Result<&[u8]>) {
        if let Some(cli) = self.cli.as_mut() {
            cli.read_done(&mut self.iso, con, chr, r);
        }
    }

    /// Handles Write Request completion.
    pub fn gatt_written(&mut self, con: ConnLid, chr: Chr, r: gatt::Result<()>) {
        if let Some(cli) = self.cli.as_mut() {
            cli.written(con, chr, r);
        }
    }

    /// Handles a notification from a Server.
    pub fn gatt_notified(&mut self, con: ConnLid, chr: Chr, v: &[u8]) {
        if let Some(cli) = self.cli.as_mut() {
            cli.notified(&mut self.iso, con, chr, v);
        }
    }

    // GATT server transport

    /// Handles a characteristic read from a Client.
    pub fn gatt_read_req(&mut self, con: ConnLid, chr: Chr) -> std::result::Result<Vec<u8>, ErrorCode> {
        match self.srv.as_ref() {
            Some(srv) => srv.read(con, chr),
            None => Err(ErrorCode::ReadNotPermitted),
        }
    }

    /// Handles a characteristic write from a Client. The returned status is
    /// sent in the ATT response.
    pub fn gatt_write_req(&mut self, con: ConnLid, chr: Chr, v: &[u8]) -> std::result::Result<(), ErrorCode> {
        match self.srv.as_mut() {
            Some(srv) => srv.write(&self.iso, con, chr, v),
            None => Err(ErrorCode::WriteNotPermitted),
        }
    }

    // Controller events

    /// Handles LE Set CIG Parameters completion.
    pub fn cig_configured(&mut self, cig_id: u8, status: Status) {
        let evt = self.iso.cig_configured(cig_id, status);
        self.dispatch(evt);
    }

    /// Handles an LE CIS Request event.
    pub fn cis_request(&mut self, con: ConnLid, cig_id: u8, cis_id: u8, hdl: ConnHandle) {
        let evt = self.iso.cis_request(con, cig_id, cis_id, hdl);
        self.dispatch(evt);
    }

    /// Handles an LE CIS Established event.
    pub fn cis_established(
        &mut self,
        con: ConnLid,
        cig_id: u8,
        cis_id: u8,
        r: std::result::Result<(ConnHandle, CisConfig), Status>,
    ) {
        let evt = self.iso.cis_established(con, cig_id, cis_id, r);
        self.dispatch(evt);
    }

    /// Handles a CIS Disconnection Complete event.
    pub fn cis_disconnected(&mut self, hdl: ConnHandle, reason: Status) {
        let evt = self.iso.cis_disconnected(hdl, reason);
        self.dispatch(evt);
    }

    /// Handles ISO data path setup or removal completion.
    pub fn dp_complete(&mut self, hdl: ConnHandle, dir: DpDirection, status: Status) {
        let evt = self.iso.dp_complete(hdl, dir, status);
        self.dispatch(evt);
    }

    /// Handles ACL connection loss. Streams are disconnected first, then all
    /// ASEs of the connection are forced to Idle.
    pub fn acl_disconnected(&mut self, con: ConnLid, reason: Status) {
        debug!("{con} disconnected: {reason}");
        for evt in self.iso.acl_disconnected(con, reason) {
            self.dispatch(Some(evt));
        }
        if let Some(cli) = self.cli.as_mut() {
            cli.disconnected(&mut self.iso, con);
        }
        if let Some(srv) = self.srv.as_mut() {
            srv.disconnected(&mut self.iso, con);
        }
    }

    /// Delivers an isochronous event to the profile role that owns the stream
    /// and then to the application.
    fn dispatch(&mut self, evt: Option<Event>) {
        let Some(evt) = evt else { return };
        if let Event::EstablishReq {
            stream,
            con,
            cig_id,
            cis_id,
        } = evt
        {
            let accept = self.app.establish_req(stream, con, cig_id, cis_id);
            if let Err(e) = self.iso.establish_cfm(stream, accept) {
                error!("Failed to answer CIS request for {stream}: {e}");
            }
            return;
        }
        let role = evt.stream().and_then(|s| self.iso.stream(s)).map(iso::Stream::role);
        match role {
            Some(Role::Central) => {
                if let Some(cli) = self.cli.as_mut() {
                    cli.iso_event(&mut self.iso, &evt);
                }
            }
            Some(Role::Peripheral) => {
                if let Some(srv) = self.srv.as_mut() {
                    srv.iso_event(&mut self.iso, &evt);
                }
            }
            None if evt.stream().is_some() => debug!("{evt:?} for removed stream"),
            None => {}
        }
        evt.notify(self.app.as_mut());
    }

    #[inline]
    fn cli_mut(&mut self) -> Result<&mut Client> {
        self.cli.as_mut().ok_or(Error::NoRole)
    }

    #[inline]
    fn srv_mut(&mut self) -> Result<&mut Server> {
        self.srv.as_mut().ok_or(Error::NoRole)
    }
}
