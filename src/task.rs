//! Tokio driver for a [`Stack`].
//!
//! [`StackTask`] owns the stack and processes one [`Input`] at a time, so
//! lower layer events and application commands never interleave. Lower
//! layers and the application talk to it through a cloneable
//! [`StackHandle`].

use std::fmt::{Debug, Formatter};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::gatt::{self, Chr, ErrorCode};
use crate::iso::{CisConfig, ConnHandle, DpDirection, Status};
use crate::{ConnLid, Stack};


/// Error type returned by the driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("stack task is closed")]
    Closed,
    #[error("stack task panicked")]
    Panicked,
}

/// Common driver result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application command executed on the stack task.
pub type Call = Box<dyn FnOnce(&mut Stack) + Send>;

/// Input processed by the stack task.
#[non_exhaustive]
pub enum Input {
    GattDiscovered(ConnLid, gatt::Result<gatt::Service>),
    GattRead(ConnLid, Chr, gatt::Result<Vec<u8>>),
    GattWritten(ConnLid, Chr, gatt::Result<()>),
    GattNotified(ConnLid, Chr, Vec<u8>),
    /// Characteristic read from a Client. The value or ATT error is sent
    /// back through `tx`.
    GattReadReq {
        con: ConnLid,
        chr: Chr,
        tx: oneshot::Sender<std::result::Result<Vec<u8>, ErrorCode>>,
    },
    /// Characteristic write from a Client.
    GattWriteReq {
        con: ConnLid,
        chr: Chr,
        val: Vec<u8>,
        tx: oneshot::Sender<std::result::Result<(), ErrorCode>>,
    },
    CigConfigured(u8, Status),
    CisRequest {
        con: ConnLid,
        cig_id: u8,
        cis_id: u8,
        hdl: ConnHandle,
    },
    CisEstablished {
        con: ConnLid,
        cig_id: u8,
        cis_id: u8,
        r: std::result::Result<(ConnHandle, CisConfig), Status>,
    },
    CisDisconnected(ConnHandle, Status),
    DpComplete(ConnHandle, DpDirection, Status),
    AclDisconnected(ConnLid, Status),
    Call(Call),
}

impl Debug for Input {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::GattDiscovered(con, ref r) => write!(f, "GattDiscovered({con}, {r:?})"),
            Self::GattRead(con, chr, ref r) => write!(f, "GattRead({con}, {chr}, {r:02X?})"),
            Self::GattWritten(con, chr, ref r) => write!(f, "GattWritten({con}, {chr}, {r:?})"),
            Self::GattNotified(con, chr, ref v) => write!(f, "GattNotified({con}, {chr}, {v:02X?})"),
            Self::GattReadReq { con, chr, .. } => write!(f, "GattReadReq({con}, {chr})"),
            Self::GattWriteReq { con, chr, ref val, .. } => {
                write!(f, "GattWriteReq({con}, {chr}, {val:02X?})")
            }
            Self::CigConfigured(cig_id, st) => write!(f, "CigConfigured({cig_id:#04X}, {st})"),
            Self::CisRequest {
                con,
                cig_id,
                cis_id,
                hdl,
            } => write!(f, "CisRequest({con}, {cig_id:#04X}, {cis_id:#04X}, {hdl:?})"),
            Self::CisEstablished {
                con,
                cig_id,
                cis_id,
                ref r,
            } => write!(f, "CisEstablished({con}, {cig_id:#04X}, {cis_id:#04X}, {r:?})"),
            Self::CisDisconnected(hdl, st) => write!(f, "CisDisconnected({hdl:?}, {st})"),
            Self::DpComplete(hdl, dir, st) => write!(f, "DpComplete({hdl:?}, {dir}, {st})"),
            Self::AclDisconnected(con, st) => write!(f, "AclDisconnected({con}, {st})"),
            Self::Call(_) => f.write_str("Call"),
        }
    }
}

/// Task that owns a [`Stack`] and processes inputs until cancelled or until
/// all handles are dropped.
#[derive(Debug)]
pub struct StackTask {
    stack: Stack,
    rx: mpsc::Receiver<Input>,
    ct: CancellationToken,
}

impl StackTask {
    /// Runs the task, returning the stack when stopped.
    pub async fn run(mut self) -> Stack {
        loop {
            tokio::select! {
                biased;
                _ = self.ct.cancelled() => break,
                input = self.rx.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
            }
        }
        // Inputs already queued are processed to keep lower layers in sync
        self.rx.close();
        while let Ok(input) = self.rx.try_recv() {
            self.handle(input);
        }
        debug!("Stack task stopped");
        self.stack
    }

    fn handle(&mut self, input: Input) {
        trace!("{input:?}");
        let s = &mut self.stack;
        match input {
            Input::GattDiscovered(con, r) => s.gatt_discovered(con, r),
            Input::GattRead(con, chr, r) => s.gatt_read(con, chr, r.as_deref().map_err(|&e| e)),
            Input::GattWritten(con, chr, r) => s.gatt_written(con, chr, r),
            Input::GattNotified(con, chr, v) => s.gatt_notified(con, chr, &v),
            Input::GattReadReq { con, chr, tx } => {
                if tx.send(s.gatt_read_req(con, chr)).is_err() {
                    warn!("Read response for {con} dropped");
                }
            }
            Input::GattWriteReq { con, chr, val, tx } => {
                if tx.send(s.gatt_write_req(con, chr, &val)).is_err() {
                    warn!("Write response for {con} dropped");
                }
            }
            Input::CigConfigured(cig_id, st) => s.cig_configured(cig_id, st),
            Input::CisRequest {
                con,
                cig_id,
                cis_id,
                hdl,
            } => s.cis_request(con, cig_id, cis_id, hdl),
            Input::CisEstablished {
                con,
                cig_id,
                cis_id,
                r,
            } => s.cis_established(con, cig_id, cis_id, r),
            Input::CisDisconnected(hdl, st) => s.cis_disconnected(hdl, st),
            Input::DpComplete(hdl, dir, st) => s.dp_complete(hdl, dir, st),
            Input::AclDisconnected(con, st) => s.acl_disconnected(con, st),
            Input::Call(f) => f(s),
        }
    }
}

/// Handle used to send inputs to a [`StackTask`].
#[derive(Clone, Debug)]
pub struct StackHandle {
    tx: mpsc::Sender<Input>,
}

impl StackHandle {
    /// Input queue depth.
    const QUEUE: usize = 32;

    /// Creates a task for `stack` and a handle connected to it. The task
    /// stops when `ct` is cancelled or all handles are dropped.
    #[must_use]
    pub fn new(stack: Stack, ct: CancellationToken) -> (Self, StackTask) {
        let (tx, rx) = mpsc::channel(Self::QUEUE);
        (Self { tx }, StackTask { stack, rx, ct })
    }

    /// Sends a lower layer event to the task.
    pub async fn send(&self, input: Input) -> Result<()> {
        self.tx.send(input).await.map_err(|_| Error::Closed)
    }

    /// Executes `f` on the task and returns its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Stack) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: Call = Box::new(move |s| {
            let _ = tx.send(f(s));
        });
        self.send(Input::Call(call)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Forwards a characteristic read from a Client and returns the response.
    pub async fn read_req(&self, con: ConnLid, chr: Chr) -> Result<std::result::Result<Vec<u8>, ErrorCode>> {
        let (tx, rx) = oneshot::channel();
        self.send(Input::GattReadReq { con, chr, tx }).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Forwards a characteristic write from a Client and returns the response.
    pub async fn write_req(&self, con: ConnLid, chr: Chr, val: Vec<u8>) -> Result<std::result::Result<(), ErrorCode>> {
        let (tx, rx) = oneshot::channel();
        self.send(Input::GattWriteReq { con, chr, val, tx }).await?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Spawned [`StackTask`] that is stopped when dropped.
#[derive(Debug)]
pub struct Spawned {
    handle: StackHandle,
    join: tokio::task::JoinHandle<Stack>,
    guard: DropGuard,
}

impl Spawned {
    /// Spawns a task for `stack` on the current runtime.
    #[must_use]
    pub fn new(stack: Stack) -> Self {
        let ct = CancellationToken::new();
        let (handle, task) = StackHandle::new(stack, ct.clone());
        Self {
            handle,
            join: tokio::spawn(task.run()),
            guard: ct.drop_guard(),
        }
    }

    /// Returns the task handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> &StackHandle {
        &self.handle
    }

    /// Stops the task and returns the stack.
    pub async fn stop(self) -> Result<Stack> {
        self.guard.disarm().cancel();
        self.join.await.map_err(|_| Error::Panicked)
    }
}
