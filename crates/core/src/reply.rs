//! Reply codes exchanged between operations and the control socket.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Result bitset returned by operations and dispatch entry points.
///
/// A code is either the empty set ([`ReplyCode::OK`]) or a combination of the
/// bits below. `CRITICALERROR` and `CANCELED` both imply `ERROR`; tests for a
/// compound code therefore use [`contains`](Self::contains) rather than
/// equality, while the dispatch loops compare against the exact values the
/// protocol contract names.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyCode(u32);

impl ReplyCode {
    /// Success; also the empty set of error bits.
    pub const OK: Self = Self(0);
    /// The operation parked itself and will be resumed by an event.
    pub const WOULDBLOCK: Self = Self(0x0001);
    /// Generic failure.
    pub const ERROR: Self = Self(0x0002);
    /// Marker bit distinguishing critical failures; never set alone.
    pub const CRITICAL: Self = Self(0x0004);
    /// Critical failure: `ERROR | CRITICAL`.
    pub const CRITICALERROR: Self = Self(0x0002 | 0x0004);
    /// Canceled by the user; implies `ERROR`.
    pub const CANCELED: Self = Self(0x0008 | 0x0002);
    /// The connection is gone.
    pub const DISCONNECTED: Self = Self(0x0010);
    /// The liveness timeout expired.
    pub const TIMEOUT: Self = Self(0x0020);
    /// The protocol driver does not implement the requested operation;
    /// implies `ERROR`.
    pub const NOTSUPPORTED: Self = Self(0x0040 | 0x0002);
    /// An internal invariant was violated; implies `ERROR`.
    pub const INTERNALERROR: Self = Self(0x0080 | 0x0002);
    /// Flow signal: re-enter the dispatch loop.
    pub const CONTINUE: Self = Self(0x0100);
    /// A password is required to proceed.
    pub const PASSWORD: Self = Self(0x0200);

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if this is exactly [`ReplyCode::OK`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the `ERROR` bit is set.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    /// Returns `true` if the operation was canceled.
    #[must_use]
    pub const fn is_canceled(self) -> bool {
        self.contains(Self::CANCELED)
    }

    /// Returns `true` if the failure is critical.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        self.contains(Self::CRITICALERROR)
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ReplyCode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReplyCode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("OK");
        }
        let mut bits = self.0;
        let mut first = true;
        for (mask, name) in [
            (Self::WOULDBLOCK.0, "WOULDBLOCK"),
            (Self::CRITICALERROR.0, "CRITICALERROR"),
            (Self::CANCELED.0, "CANCELED"),
            (Self::NOTSUPPORTED.0, "NOTSUPPORTED"),
            (Self::INTERNALERROR.0, "INTERNALERROR"),
            (Self::ERROR.0, "ERROR"),
            (Self::DISCONNECTED.0, "DISCONNECTED"),
            (Self::TIMEOUT.0, "TIMEOUT"),
            (Self::CONTINUE.0, "CONTINUE"),
            (Self::PASSWORD.0, "PASSWORD"),
        ] {
            if bits & mask == mask && mask != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                bits &= !mask;
            }
        }
        if bits != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{bits:#x}")?;
        }
        Ok(())
    }
}
