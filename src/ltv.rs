//! Length-type-value structures used for Codec Specific Configuration and
//! Metadata ([Assigned Numbers] Section 6.12).
//!
//! The core never interprets these values. They are stored, compared, and
//! forwarded byte-for-byte. Well-formedness checks and the accessors below are
//! conveniences for the application and for server-side validation.

use std::fmt::{Debug, Formatter};

use structbuf::{Pack, Packer, StructBuf, Unpacker};

/// Maximum length of an LTV blob carried in a single-octet length field.
pub const MAX_LEN: usize = u8::MAX as _;

/// Codec Specific Configuration LTV types
/// ([Assigned Numbers] Section 6.12.5).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum CodecCfgType {
    SamplingFrequency = 0x01,
    FrameDuration = 0x02,
    AudioChannelAllocation = 0x03,
    OctetsPerCodecFrame = 0x04,
    CodecFrameBlocksPerSdu = 0x05,
}

/// Metadata LTV types ([Assigned Numbers] Section 6.12.6).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum MetadataType {
    PreferredAudioContexts = 0x01,
    StreamingAudioContexts = 0x02,
    ProgramInfo = 0x03,
    Language = 0x04,
    CcidList = 0x05,
    ParentalRating = 0x06,
    ProgramInfoUri = 0x07,
    AudioActiveState = 0x08,
    BroadcastAudioImmediateRenderingFlag = 0x09,
    ExtendedMetadata = 0xFE,
    VendorSpecific = 0xFF,
}

/// Opaque LTV-encoded byte string. The length never exceeds [`MAX_LEN`]:
/// longer inputs are truncated on conversion, which leaves the last structure
/// incomplete and the value invalid.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Ltv(Vec<u8>);

impl Ltv {
    /// Creates an empty value.
    #[inline(always)]
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the raw bytes.
    #[inline(always)]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length in bytes.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the value is empty.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether the byte string is a sequence of complete LTV
    /// structures. An empty value is well-formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.iter().all(|r| r.is_ok())
    }

    /// Returns an iterator over `(type, value)` pairs. The iterator yields a
    /// single `Err(offset)` and stops at the first truncated structure.
    #[inline]
    pub fn iter(&self) -> Iter {
        Iter {
            p: Unpacker::new(&self.0),
            off: 0,
        }
    }

    /// Returns the value of the first structure of type `typ`.
    #[must_use]
    pub fn get(&self, typ: impl Into<u8>) -> Option<&[u8]> {
        let typ = typ.into();
        (self.iter().map_while(Result::ok)).find_map(|(t, v)| (t == typ).then_some(v))
    }

    /// Returns the first structure type that is not in `known`, if any.
    /// Malformed values are reported as type `0`.
    #[must_use]
    pub fn first_unknown(&self, known: &[u8]) -> Option<u8> {
        self.iter().find_map(|r| match r {
            Ok((t, _)) => (!known.contains(&t)).then_some(t),
            Err(_) => Some(0),
        })
    }

    /// Returns the Content Control IDs from a metadata value.
    #[must_use]
    pub fn ccids(&self) -> &[u8] {
        self.get(MetadataType::CcidList).unwrap_or_default()
    }
}

impl Debug for Ltv {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ltv({:02X?})", self.0)
    }
}

impl From<Vec<u8>> for Ltv {
    #[inline]
    fn from(mut v: Vec<u8>) -> Self {
        v.truncate(MAX_LEN);
        Self(v)
    }
}

impl From<&[u8]> for Ltv {
    #[inline]
    fn from(v: &[u8]) -> Self {
        Self(v[..v.len().min(MAX_LEN)].to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Ltv {
    #[inline]
    fn from(v: [u8; N]) -> Self {
        Self::from(&v[..])
    }
}

impl From<LtvMut> for Ltv {
    #[inline]
    fn from(b: LtvMut) -> Self {
        Self(b.0.as_ref().to_vec())
    }
}

impl AsRef<[u8]> for Ltv {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Iterator over LTV structures.
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    p: Unpacker<'a>,
    off: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<(u8, &'a [u8]), usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.p.is_empty() {
            return None;
        }
        let n = usize::from(self.p.u8());
        let v = match self.p.skip(n) {
            Some(mut v) if n > 0 => {
                let typ = v.u8();
                Ok((typ, v.take().into_inner().unwrap_or_default()))
            }
            _ => Err(self.off),
        };
        if v.is_err() {
            self.p.take();
        }
        self.off += 1 + n;
        Some(v)
    }
}

/// LTV builder.
#[derive(Clone, Debug)]
pub struct LtvMut(StructBuf);

impl LtvMut {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(StructBuf::new(MAX_LEN))
    }

    /// Appends an 8-bit value.
    #[inline]
    pub fn u8(&mut self, typ: impl Into<u8>, v: u8) -> &mut Self {
        self.put(typ, |p| {
            p.u8(v);
        })
    }

    /// Appends a 16-bit value.
    #[inline]
    pub fn u16(&mut self, typ: impl Into<u8>, v: u16) -> &mut Self {
        self.put(typ, |p| {
            p.u16(v);
        })
    }

    /// Appends a 32-bit value.
    #[inline]
    pub fn u32(&mut self, typ: impl Into<u8>, v: u32) -> &mut Self {
        self.put(typ, |p| {
            p.u32(v);
        })
    }

    /// Appends a byte string value.
    #[inline]
    pub fn bytes(&mut self, typ: impl Into<u8>, v: &[u8]) -> &mut Self {
        self.put(typ, |p| {
            p.put(v);
        })
    }

    /// Returns the final value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Ltv {
        Ltv(self.0.as_ref().to_vec())
    }

    /// Appends a length-type-value structure, calling `f` to provide the
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if the total length exceeds [`MAX_LEN`].
    fn put(&mut self, typ: impl Into<u8>, f: impl FnOnce(&mut Packer)) -> &mut Self {
        let i = self.0.len();
        f(self.0.append().put([0, typ.into()]));
        let n = u8::try_from(self.0.len() - (i + 1)).expect("LTV overflow");
        self.0[i] = n;
        self
    }
}

impl Default for LtvMut {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// LC3 Codec Specific Configuration helpers ([BAP] Section 4.3.2).
pub mod lc3 {
    use super::{CodecCfgType, Ltv, LtvMut};

    /// Sampling frequency code for 16 kHz.
    pub const FREQ_16K: u8 = 0x03;
    /// Sampling frequency code for 24 kHz.
    pub const FREQ_24K: u8 = 0x05;
    /// Sampling frequency code for 48 kHz.
    pub const FREQ_48K: u8 = 0x08;
    /// Frame duration code for 7.5 ms.
    pub const DURATION_7_5MS: u8 = 0x00;
    /// Frame duration code for 10 ms.
    pub const DURATION_10MS: u8 = 0x01;

    /// Returns an LC3 configuration with one codec frame per SDU.
    #[must_use]
    pub fn config(freq: u8, duration: u8, location: u32, octets_per_frame: u16) -> Ltv {
        LtvMut::new()
            .u8(CodecCfgType::SamplingFrequency, freq)
            .u8(CodecCfgType::FrameDuration, duration)
            .u32(CodecCfgType::AudioChannelAllocation, location)
            .u16(CodecCfgType::OctetsPerCodecFrame, octets_per_frame)
            .get()
    }
}
