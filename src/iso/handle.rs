use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroU16;

use crate::util::name_of;

/// CIS connection handle assigned by the Controller
/// ([Vol 4] Part E, Section 5.4.2).
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct ConnHandle(NonZeroU16);

impl ConnHandle {
    /// Number of meaningful bits.
    const BITS: u16 = 12;
    /// Maximum valid connection handle.
    const MAX: u16 = 0xEFF;

    /// Wraps a raw connection handle. Returns `None` if the handle is invalid.
    #[inline]
    #[must_use]
    pub fn new(mut v: u16) -> Option<Self> {
        v &= (1 << Self::BITS) - 1;
        (v <= Self::MAX).then(|| Self(NonZeroU16::new(!v).unwrap_or(NonZeroU16::MAX)))
    }
}

impl From<ConnHandle> for u16 {
    #[inline]
    fn from(cn: ConnHandle) -> Self {
        !cn.0.get()
    }
}

impl Debug for ConnHandle {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#05X})", name_of!(ConnHandle), u16::from(*self))
    }
}

impl Display for ConnHandle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
