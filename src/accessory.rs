//! Accessory decoder address arithmetic.
//!
//! NMRA basic accessory decoders are addressed by a 9-bit board address with
//! four outputs (indexes 0-3) per board. Throttles and the layout bus speak in
//! 12-bit linear addresses instead, where linear address 1 is board 1 index 0.
//!
//! ```rust
//! use rs_dcc_station::accessory::{decompose, linear_address};
//!
//! assert_eq!(decompose(9), (3, 0));
//! assert_eq!(decompose(10), (3, 1));
//! assert_eq!(linear_address(3, 1), 10);
//! ```

/// Number of outputs on a basic accessory decoder board.
pub const OUTPUTS_PER_BOARD: u16 = 4;

/// Highest board address that fits in a basic accessory packet.
pub const MAX_BOARD_ADDRESS: u16 = 511;

/// Split a linear accessory address into `(board_address, index)`.
///
/// Uses truncating integer division; linear address 0 maps to board 0
/// index 3, which is the broadcast convention used by some decoders.
#[inline]
pub const fn decompose(linear: u16) -> (u16, u8) {
    let board = (linear as u32 + 3) / 4;
    let index = linear as i32 - (board as i32) * 4 + 3;
    (board as u16, index as u8)
}

/// Rebuild the linear address from a board address and output index.
#[inline]
pub const fn linear_address(board: u16, index: u8) -> u16 {
    let linear = board as i32 * 4 + index as i32 - 3;
    if linear < 0 {
        0
    } else {
        linear as u16
    }
}

/// A decoded basic accessory instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessoryPacket {
    /// Decoder board address (0-511).
    pub board: u16,
    /// Output index on the board (0-3).
    pub index: u8,
    /// Activate (thrown) or deactivate (closed).
    pub activate: bool,
}

impl AccessoryPacket {
    /// Create an instruction for the given board output.
    pub const fn new(board: u16, index: u8, activate: bool) -> Self {
        Self {
            board,
            index,
            activate,
        }
    }

    /// Linear decoder address for this board output.
    pub const fn linear_address(&self) -> u16 {
        linear_address(self.board, self.index)
    }

    /// Encode as the two instruction bytes.
    pub const fn encode(&self) -> [u8; 2] {
        encode_basic_accessory(self.board, self.index, self.activate)
    }
}

/// Pack a basic accessory instruction.
///
/// The first byte is `10AAAAAA` carrying the six low address bits. The second
/// is `1AAACDDD` where the three high address bits are sent in ones
/// complement, `C` is set and the low `D` bit is the activate flag.
#[inline]
pub const fn encode_basic_accessory(board: u16, index: u8, activate: bool) -> [u8; 2] {
    let byte0 = 0x80 | (board % 64) as u8;
    let high = ((board / 64) % 8) as u8;
    let byte1 = ((high << 4) | ((index % 4) << 1) | activate as u8) ^ 0xF8;
    [byte0, byte1]
}

/// Unpack a basic accessory instruction.
///
/// Returns `None` when the bytes are not shaped like a basic accessory
/// packet (first byte outside `10xxxxxx`, or second byte without its top bit).
#[inline]
pub const fn decode_basic_accessory(byte0: u8, byte1: u8) -> Option<AccessoryPacket> {
    if byte0 & 0xC0 != 0x80 || byte1 & 0x80 == 0 {
        return None;
    }
    let ones = byte1 ^ 0xF8;
    let board = (byte0 & 0x3F) as u16 | ((((ones >> 4) & 0x07) as u16) << 6);
    let index = (ones >> 1) & 0x03;
    let activate = ones & 0x01 == 1;
    Some(AccessoryPacket {
        board,
        index,
        activate,
    })
}
