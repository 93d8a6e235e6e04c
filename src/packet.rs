//! DCC instruction packets emitted by the registries.
//!
//! Packets are built without the trailing error-detection byte; the signal
//! generator behind [`PacketSink`](crate::traits::PacketSink) appends it when
//! the packet is clocked onto the rails.
//!
//! # Address encoding
//!
//! | Address | Bytes |
//! |---------|-------|
//! | 0 | `0x00` (broadcast) |
//! | 1-127 | one byte |
//! | 128-10239 | `0xC0 \| high`, `low` |

use heapless::Vec;

use crate::locomotive::{Direction, FunctionGroup, FunctionState};

/// Maximum packet length in bytes, excluding the checksum.
pub const MAX_PACKET_LEN: usize = 6;

/// Highest address reachable with a one byte (short) address.
pub const MAX_SHORT_ADDRESS: u16 = 127;

/// Highest extended (long) locomotive address.
pub const MAX_LONG_ADDRESS: u16 = 10239;

/// Speed step value meaning "emergency stop".
pub const EMERGENCY_STOP: i8 = -1;

/// Highest speed step in 128 step mode.
pub const MAX_SPEED_STEP: i8 = 126;

/// Configuration variable holding the decoder-assisted consist address.
pub const CONSIST_ADDRESS_CV: u16 = 19;

/// Raw DCC packet bytes.
pub type Packet = Vec<u8, MAX_PACKET_LEN>;

/// Address bytes for `address`, and how many of them are used.
fn address_bytes(address: u16) -> ([u8; 2], usize) {
    if address > MAX_SHORT_ADDRESS {
        ([0xC0 | ((address >> 8) as u8 & 0x3F), (address & 0xFF) as u8], 2)
    } else {
        ([address as u8, 0], 1)
    }
}

/// `address` followed by `instruction`.
///
/// Instructions built here are at most three bytes, so with a long address
/// the packet is at most five and always fits in [`MAX_PACKET_LEN`].
fn addressed(address: u16, instruction: &[u8]) -> Packet {
    let (head, len) = address_bytes(address);
    let mut packet = Packet::new();
    // Both fit; see above.
    packet.extend_from_slice(&head[..len]).ok();
    packet.extend_from_slice(instruction).ok();
    debug_assert_eq!(packet.len(), len + instruction.len());
    packet
}

/// Advanced operations (128 step) speed and direction instruction.
///
/// Speed `0` stops with momentum and [`EMERGENCY_STOP`] stops immediately;
/// values above [`MAX_SPEED_STEP`] are clamped.
pub fn speed_128(address: u16, speed: i8, direction: Direction) -> Packet {
    let step = match speed {
        s if s < 0 => 1,
        0 => 0,
        s => s.min(MAX_SPEED_STEP) as u8 + 1,
    };
    let dir_bit = if direction.is_forward() { 0x80 } else { 0x00 };
    addressed(address, &[0x3F, dir_bit | step])
}

/// Function group instruction for one of the five F0-F28 groups.
pub fn function_group(address: u16, group: FunctionGroup, functions: &FunctionState) -> Packet {
    match group {
        FunctionGroup::F0F4 => {
            let fl = if functions.get(0) { 0x10 } else { 0x00 };
            addressed(address, &[0x80 | fl | functions.bits(1, 4)])
        }
        FunctionGroup::F5F8 => addressed(address, &[0xB0 | functions.bits(5, 8)]),
        FunctionGroup::F9F12 => addressed(address, &[0xA0 | functions.bits(9, 12)]),
        FunctionGroup::F13F20 => addressed(address, &[0xDE, functions.bits(13, 20)]),
        FunctionGroup::F21F28 => addressed(address, &[0xDF, functions.bits(21, 28)]),
    }
}

/// Operations mode (programming on the main) CV write, byte form.
pub fn ops_write_cv(address: u16, cv: u16, value: u8) -> Packet {
    let cv_index = cv.saturating_sub(1);
    addressed(
        address,
        &[
            0xEC | ((cv_index >> 8) as u8 & 0x03),
            (cv_index & 0xFF) as u8,
            value,
        ],
    )
}

/// Broadcast emergency stop for every locomotive decoder.
pub fn broadcast_emergency_stop() -> Packet {
    addressed(0, &[0x41])
}

/// Basic accessory instruction, see [`crate::accessory::encode_basic_accessory`].
pub fn basic_accessory(board: u16, index: u8, activate: bool) -> Packet {
    let mut packet = Packet::new();
    // Two bytes, well within capacity.
    packet
        .extend_from_slice(&crate::accessory::encode_basic_accessory(board, index, activate))
        .ok();
    packet
}
