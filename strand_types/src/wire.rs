//! Request opcodes, completion statuses, interrupt events, and the
//! fixed-size notification payload.

use crate::address::NodeAddr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known register addresses shared by the monitor and the link layer.
pub mod regs {
    /// Vendor identity register, present on every node.
    pub const IDENTITY: u8 = 0x02;
    /// Expected value of [`IDENTITY`] for supported transceivers.
    pub const IDENTITY_EXPECTED: u8 = 0xAD;
    /// Write-1-to-clear control for the line error counters.
    pub const ERR_RESET: u8 = 0x1C;
}

/// Command codes carried by request envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Read the cached node status byte. Answered synchronously.
    ReadStatus,
    /// Report the node's vendor/product/version triple. Synchronous.
    ReadVersion,
    /// Power up the downstream peripheral. Peripheral-bound, deferred.
    PowerUp,
    /// Power down the downstream peripheral. Peripheral-bound, deferred.
    PowerDown,
    /// Bus-wide enumeration handshake, master-addressed only.
    Discover,
    /// Any other command code seen on the wire.
    Other(u8),
}

impl Opcode {
    /// Whether a slave plugin answers this command without suspending.
    pub const fn is_synchronous(&self) -> bool {
        matches!(self, Opcode::ReadStatus | Opcode::ReadVersion)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::ReadStatus => write!(f, "read-status"),
            Opcode::ReadVersion => write!(f, "read-version"),
            Opcode::PowerUp => write!(f, "power-up"),
            Opcode::PowerDown => write!(f, "power-down"),
            Opcode::Discover => write!(f, "discover"),
            Opcode::Other(code) => write!(f, "op(0x{:02x})", code),
        }
    }
}

/// Final status of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Request succeeded; payload is valid.
    Ok,
    /// Authentication-class discovery failure (configuration mismatch).
    AuthFailure,
    /// A line/power fault interrupted the operation.
    Fault,
    /// The addressed peripheral did not answer in time.
    Timeout,
    /// Command was not recognized and had no effect.
    Ignored,
    /// Any other failure.
    Error,
}

impl ResponseStatus {
    /// Whether this status represents a successful completion.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::AuthFailure => "auth-failure",
            ResponseStatus::Fault => "fault",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::Ignored => "ignored",
            ResponseStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Interrupt classification as reported by the transceiver.
///
/// Only GPIO-class interrupts are meaningful to a slave plugin; the
/// remaining kinds are consumed elsewhere in the stack or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptKind {
    /// A GPIO pin on the node changed state.
    Gpio { pin: u8 },
    /// Data parity error on the audio frame.
    DataParity,
    /// CRC error on a superframe.
    Crc,
    /// Power-management interrupt (handled by the fault path).
    PowerError,
    /// Vendor-specific or reserved interrupt code.
    Other(u8),
}

impl InterruptKind {
    /// Whether this kind is in the GPIO class.
    #[inline]
    pub const fn is_gpio(&self) -> bool {
        matches!(self, InterruptKind::Gpio { .. })
    }
}

/// One classified hardware interrupt, attributed to its source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEvent {
    /// Node that raised the interrupt.
    pub source: NodeAddr,
    /// Classified interrupt kind.
    pub kind: InterruptKind,
}

/// Maximum data bytes carried by one notification item.
pub const NOTIFY_DATA_MAX: usize = 8;

/// Payload stored in a pooled notification item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    /// What kind of event the notification describes (e.g. GPIO edge).
    pub mode: u8,
    /// Event parameter (pin number, diagnostic id).
    pub param: u16,
    /// Raw event data, `len` bytes valid.
    pub data: [u8; NOTIFY_DATA_MAX],
    /// Number of valid bytes in `data`.
    pub len: u8,
}

impl NotifyPayload {
    /// GPIO edge notification for `pin`.
    pub fn gpio(pin: u8) -> Self {
        let mut data = [0u8; NOTIFY_DATA_MAX];
        data[0] = pin;
        Self {
            mode: 0x01,
            param: pin as u16,
            data,
            len: 1,
        }
    }

    /// The valid prefix of `data`.
    pub fn bytes(&self) -> &[u8] {
        let len = (self.len as usize).min(NOTIFY_DATA_MAX);
        &self.data[..len]
    }
}

impl Default for NotifyPayload {
    fn default() -> Self {
        Self {
            mode: 0,
            param: 0,
            data: [0u8; NOTIFY_DATA_MAX],
            len: 0,
        }
    }
}
