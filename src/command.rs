//! EtherCAT command codes and the address-field conventions each implies.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One of the EtherCAT datagram command codes.
///
/// The discriminants are the wire values; `num_enum` gives us a checked
/// `u8 -> CommandType` conversion for decoding replies instead of a
/// hand-rolled match arm per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    /// No operation; a slave ignores the datagram. Used to pad frame timing.
    Nop = 0x00,
    /// Auto Increment Read.
    Aprd = 0x01,
    /// Auto Increment Write.
    Apwr = 0x02,
    /// Auto Increment Read Write.
    Aprw = 0x03,
    /// Configured Address Read.
    Fprd = 0x04,
    /// Configured Address Write.
    Fpwr = 0x05,
    /// Configured Address Read Write.
    Fprw = 0x06,
    /// Broadcast Read.
    Brd = 0x07,
    /// Broadcast Write.
    Bwr = 0x08,
    /// Broadcast Read Write.
    Brw = 0x09,
    /// Logical Memory Read.
    Lrd = 0x0A,
    /// Logical Memory Write.
    Lwr = 0x0B,
    /// Logical Memory Read Write.
    Lrw = 0x0C,
    /// Auto Increment Read Multiple Write: a slave reads then all following
    /// slaves write the value read by the first.
    Armw = 0x0D,
    /// Configured Address Read Multiple Write: as `Armw`, addressed by
    /// configured station address instead of auto-increment position.
    Frmw = 0x0E,
}

impl CommandType {
    /// Commands whose TX-side payload carries no caller data and so MUST be
    /// transmitted zero-filled (§4.1): auto-increment/configured/broadcast/
    /// logical reads, and `Nop` used as a placeholder.
    pub fn is_no_data(self) -> bool {
        matches!(
            self,
            CommandType::Nop | CommandType::Aprd | CommandType::Fprd | CommandType::Brd | CommandType::Lrd
        )
    }
}

/// Converts a slave position (0-based, as counted from the master) into the
/// auto-increment ADP value slaves decrement as the datagram passes through
/// them. Position 0 is encoded as 0; each subsequent position wraps downward
/// from `0xFFFF`.
pub fn auto_increment_adp(slave_position: u16) -> u16 {
    if slave_position == 0 {
        0
    } else {
        0xFFFF - (slave_position - 1)
    }
}

/// Splits a 32-bit logical address into the `(ADP, ADO)` pair a logical
/// datagram (`LRD`/`LWR`/`LRW`) carries: ADP is the low 16 bits, ADO the
/// high 16 bits (§4.4).
pub fn split_logical_address(address: u32) -> (u16, u16) {
    ((address & 0xFFFF) as u16, (address >> 16) as u16)
}
