//! Runtime locomotive throttle state.
//!
//! A [`Locomotive`] is the transient object the registry keeps for every
//! address a throttle is driving. It remembers the last speed, direction and
//! function states so the refresh scheduler can keep re-sending them.
//!
//! # Function bytes
//!
//! The legacy text protocol sends function changes as the raw DCC function
//! group instruction byte. [`decode_function_bytes`] maps such a byte (plus
//! the optional expansion byte) back to the functions it touches:
//!
//! ```rust
//! use rs_dcc_station::locomotive::{decode_function_bytes, FunctionGroup, FunctionState};
//!
//! let mut functions = FunctionState::default();
//! // 0x90 = 100 1 0000 -> F0 on, F1-F4 off
//! let group = decode_function_bytes(&mut functions, 0x90, None);
//! assert_eq!(group, FunctionGroup::F0F4);
//! assert!(functions.get(0));
//! ```

use crate::packet::{self, Packet, EMERGENCY_STOP, MAX_SPEED_STEP};

/// Direction of travel as seen by the decoder.
///
/// DCC has no "stopped" direction; a stopped locomotive still remembers
/// which way it will move next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Moving forward.
    #[default]
    Forward,
    /// Moving in reverse.
    Reverse,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// ```
    /// use rs_dcc_station::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// Build from the protocol flag (`true`/`1` = forward).
    #[inline]
    pub const fn from_flag(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Protocol flag: `1` forward, `0` reverse.
    #[inline]
    pub const fn as_flag(&self) -> u8 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => 0,
        }
    }

    /// Whether this is [`Direction::Forward`].
    #[inline]
    pub const fn is_forward(&self) -> bool {
        matches!(self, Direction::Forward)
    }

    /// The opposite direction.
    #[inline]
    pub const fn reversed(&self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// Highest function number tracked (F28).
pub const MAX_FUNCTION: u8 = 28;

/// The five DCC function group instructions covering F0-F28.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionGroup {
    /// Group one: FL (F0) and F1-F4.
    F0F4,
    /// Group two, first half: F5-F8.
    F5F8,
    /// Group two, second half: F9-F12.
    F9F12,
    /// Feature expansion: F13-F20.
    F13F20,
    /// Feature expansion: F21-F28.
    F21F28,
}

impl FunctionGroup {
    /// All groups in refresh order.
    pub const ALL: [FunctionGroup; 5] = [
        FunctionGroup::F0F4,
        FunctionGroup::F5F8,
        FunctionGroup::F9F12,
        FunctionGroup::F13F20,
        FunctionGroup::F21F28,
    ];

    /// Group containing function `function`.
    pub const fn for_function(function: u8) -> Option<Self> {
        match function {
            0..=4 => Some(FunctionGroup::F0F4),
            5..=8 => Some(FunctionGroup::F5F8),
            9..=12 => Some(FunctionGroup::F9F12),
            13..=20 => Some(FunctionGroup::F13F20),
            21..=28 => Some(FunctionGroup::F21F28),
            _ => None,
        }
    }
}

/// On/off state of F0-F28 packed into the low 29 bits of a `u32`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FunctionState(u32);

impl FunctionState {
    /// State of function `function`. Out of range functions read as off.
    pub const fn get(&self, function: u8) -> bool {
        function <= MAX_FUNCTION && self.0 & (1 << function) != 0
    }

    /// Set function `function`. Out of range functions are ignored.
    pub fn set(&mut self, function: u8, on: bool) {
        if function > MAX_FUNCTION {
            return;
        }
        if on {
            self.0 |= 1 << function;
        } else {
            self.0 &= !(1 << function);
        }
    }

    /// Set `first..=last` from the low bits of `byte`: bit k drives
    /// function `first + k`.
    pub fn set_range(&mut self, first: u8, last: u8, byte: u8) {
        for function in first..=last.min(MAX_FUNCTION) {
            let bit = function - first;
            if bit >= 8 {
                break;
            }
            self.set(function, byte & (1 << bit) != 0);
        }
    }

    /// Collect `first..=last` into a byte, function `first` in bit 0.
    pub fn bits(&self, first: u8, last: u8) -> u8 {
        let mut byte = 0u8;
        for function in first..=last.min(MAX_FUNCTION) {
            let bit = function - first;
            if bit >= 8 {
                break;
            }
            if self.get(function) {
                byte |= 1 << bit;
            }
        }
        byte
    }
}

/// Apply a legacy function instruction byte (and optional expansion byte)
/// to `functions`, returning the group it addressed.
///
/// With an expansion byte, a primary byte matching `0xDE` selects F13-F20
/// and anything else F21-F28. Without one, `0xB0` selects F5-F8, then `0xA0`
/// selects F9-F12, and anything else is group one where bit 4 is F0 and
/// bits 0-3 are F1-F4. The order of these checks matters: `0xB0` also
/// matches the `0xA0` mask.
pub fn decode_function_bytes(
    functions: &mut FunctionState,
    primary: u8,
    secondary: Option<u8>,
) -> FunctionGroup {
    match secondary {
        Some(expansion) => {
            if primary & 0xDE == 0xDE {
                functions.set_range(13, 20, expansion);
                FunctionGroup::F13F20
            } else {
                functions.set_range(21, 28, expansion);
                FunctionGroup::F21F28
            }
        }
        None => {
            if primary & 0xB0 == 0xB0 {
                functions.set_range(5, 8, primary);
                FunctionGroup::F5F8
            } else if primary & 0xA0 == 0xA0 {
                functions.set_range(9, 12, primary);
                FunctionGroup::F9F12
            } else {
                functions.set(0, primary & 0x10 != 0);
                functions.set_range(1, 4, primary);
                FunctionGroup::F0F4
            }
        }
    }
}

/// A locomotive being driven by a throttle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locomotive {
    register: u8,
    address: u16,
    speed: i8,
    direction: Direction,
    functions: FunctionState,
    refresh_phase: usize,
}

impl Locomotive {
    /// Create a stopped, forward-facing locomotive.
    pub fn new(register: u8, address: u16) -> Self {
        Self {
            register,
            address,
            speed: 0,
            direction: Direction::Forward,
            functions: FunctionState::default(),
            refresh_phase: 0,
        }
    }

    /// Legacy register slot (0 when not bound to one).
    pub fn register(&self) -> u8 {
        self.register
    }

    /// Bind to a legacy register slot.
    pub fn set_register(&mut self, register: u8) {
        self.register = register;
    }

    /// DCC address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Change the DCC address.
    pub fn set_address(&mut self, address: u16) {
        self.address = address;
    }

    /// Current speed step, [`EMERGENCY_STOP`] after an e-stop.
    pub fn speed(&self) -> i8 {
        self.speed
    }

    /// Set speed; anything negative becomes the e-stop sentinel.
    pub fn set_speed(&mut self, speed: i8) {
        self.speed = if speed < 0 {
            EMERGENCY_STOP
        } else {
            speed.min(MAX_SPEED_STEP)
        };
    }

    /// Current direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Change direction.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Whether the last speed command was an emergency stop.
    pub fn is_emergency_stopped(&self) -> bool {
        self.speed == EMERGENCY_STOP
    }

    /// Function states.
    pub fn functions(&self) -> &FunctionState {
        &self.functions
    }

    /// Mutable function states.
    pub fn functions_mut(&mut self) -> &mut FunctionState {
        &mut self.functions
    }

    /// Speed and direction packet for the current state.
    pub fn speed_packet(&self) -> Packet {
        packet::speed_128(self.address, self.speed, self.direction)
    }

    /// Packet for one function group.
    pub fn function_packet(&self, group: FunctionGroup) -> Packet {
        packet::function_group(self.address, group, &self.functions)
    }

    /// Next function group to refresh; advances the rotation.
    pub(crate) fn next_refresh_group(&mut self) -> FunctionGroup {
        let group = FunctionGroup::ALL[self.refresh_phase % FunctionGroup::ALL.len()];
        self.refresh_phase = (self.refresh_phase + 1) % FunctionGroup::ALL.len();
        group
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> LocomotiveStatus {
        LocomotiveStatus {
            register: self.register,
            address: self.address,
            speed: self.speed,
            direction: self.direction,
            functions: self.functions,
        }
    }
}

/// Point-in-time view of a [`Locomotive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocomotiveStatus {
    /// Legacy register slot.
    pub register: u8,
    /// DCC address.
    pub address: u16,
    /// Speed step.
    pub speed: i8,
    /// Direction.
    pub direction: Direction,
    /// Function states.
    pub functions: FunctionState,
}

impl LocomotiveStatus {
    /// Legacy throttle reply: `<T register speed direction>`.
    pub fn to_protocol(&self) -> String {
        format!(
            "<T {} {} {}>",
            self.register,
            self.speed,
            self.direction.as_flag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(primary: u8, secondary: Option<u8>) -> (FunctionState, FunctionGroup) {
        let mut functions = FunctionState::default();
        let group = decode_function_bytes(&mut functions, primary, secondary);
        (functions, group)
    }

    fn on_functions(functions: &FunctionState) -> Vec<u8> {
        (0..=MAX_FUNCTION).filter(|f| functions.get(*f)).collect()
    }

    #[test]
    fn byte_b0_touches_only_f5_to_f8() {
        let (functions, group) = decoded(0xBF, None);
        assert_eq!(group, FunctionGroup::F5F8);
        assert_eq!(on_functions(&functions), vec![5, 6, 7, 8]);

        let (functions, group) = decoded(0xB0, None);
        assert_eq!(group, FunctionGroup::F5F8);
        assert!(on_functions(&functions).is_empty());
    }

    #[test]
    fn byte_a0_touches_only_f9_to_f12() {
        let (functions, group) = decoded(0xA5, None);
        assert_eq!(group, FunctionGroup::F9F12);
        assert_eq!(on_functions(&functions), vec![9, 11]);
    }

    #[test]
    fn group_one_maps_bit_four_to_f0() {
        let (functions, group) = decoded(0x90, None);
        assert_eq!(group, FunctionGroup::F0F4);
        assert_eq!(on_functions(&functions), vec![0]);

        let (functions, _) = decoded(0x8A, None);
        assert_eq!(on_functions(&functions), vec![2, 4]);
    }

    #[test]
    fn group_one_clears_previous_states() {
        let mut functions = FunctionState::default();
        decode_function_bytes(&mut functions, 0x9F, None);
        assert_eq!(on_functions(&functions), vec![0, 1, 2, 3, 4]);
        decode_function_bytes(&mut functions, 0x80, None);
        assert!(on_functions(&functions).is_empty());
    }

    #[test]
    fn expansion_byte_de_selects_f13_to_f20() {
        let (functions, group) = decoded(0xDE, Some(0b1000_0001));
        assert_eq!(group, FunctionGroup::F13F20);
        assert_eq!(on_functions(&functions), vec![13, 20]);
    }

    #[test]
    fn expansion_byte_other_selects_f21_to_f28() {
        let (functions, group) = decoded(0xDF, Some(0xFF));
        // 0xDF also matches the 0xDE mask
        assert_eq!(group, FunctionGroup::F13F20);
        assert_eq!(on_functions(&functions), (13..=20).collect::<Vec<_>>());

        let (functions, group) = decoded(0xC0, Some(0b0000_0011));
        assert_eq!(group, FunctionGroup::F21F28);
        assert_eq!(on_functions(&functions), vec![21, 22]);
    }

    #[test]
    fn function_state_ignores_out_of_range() {
        let mut functions = FunctionState::default();
        functions.set(29, true);
        functions.set(200, true);
        assert_eq!(functions, FunctionState::default());
        assert!(!functions.get(29));
    }

    #[test]
    fn bits_round_trip_through_set_range() {
        let mut functions = FunctionState::default();
        functions.set_range(21, 28, 0xA5);
        assert_eq!(functions.bits(21, 28), 0xA5);
    }

    #[test]
    fn negative_speed_becomes_estop_sentinel() {
        let mut loco = Locomotive::new(1, 3);
        loco.set_speed(-5);
        assert!(loco.is_emergency_stopped());
        assert_eq!(loco.speed(), EMERGENCY_STOP);
        loco.set_speed(120);
        assert_eq!(loco.speed(), 120);
        loco.set_speed(127);
        assert_eq!(loco.speed(), MAX_SPEED_STEP);
    }

    #[test]
    fn refresh_rotates_through_all_groups() {
        let mut loco = Locomotive::new(1, 3);
        let groups: Vec<_> = (0..6).map(|_| loco.next_refresh_group()).collect();
        assert_eq!(&groups[..5], &FunctionGroup::ALL);
        assert_eq!(groups[5], FunctionGroup::F0F4);
    }

    #[test]
    fn status_renders_legacy_reply() {
        let mut loco = Locomotive::new(2, 3);
        loco.set_speed(50);
        loco.set_direction(Direction::Forward);
        assert_eq!(loco.status().to_protocol(), "<T 2 50 1>");
    }

    #[test]
    fn function_group_lookup() {
        assert_eq!(FunctionGroup::for_function(0), Some(FunctionGroup::F0F4));
        assert_eq!(FunctionGroup::for_function(12), Some(FunctionGroup::F9F12));
        assert_eq!(FunctionGroup::for_function(28), Some(FunctionGroup::F21F28));
        assert_eq!(FunctionGroup::for_function(29), None);
    }
}
