//! Locomotive consists.
//!
//! A consist drives several locomotives from one throttle address. Two modes
//! are supported:
//!
//! - **Standard** (command station consist): every throttle change is fanned
//!   out as one speed packet per member, flipping direction for members that
//!   run backwards in the lash-up.
//! - **Decoder assisted** (NMRA advanced consist): each member decoder is
//!   told the consist address through CV19 when it joins, after which a
//!   single packet to the consist address moves every member. CV19 only
//!   holds seven address bits, so these consists live at 1-127.

use serde::{Deserialize, Serialize};

use crate::locomotive::Direction;
use crate::packet::{self, Packet, CONSIST_ADDRESS_CV, EMERGENCY_STOP, MAX_SPEED_STEP};
use crate::roster::FileRef;

/// Index document listing the per-consist files.
pub const CONSIST_INDEX_FILE: &str = "lococonsists.json";

/// Legacy monolithic consist document.
pub const LEGACY_CONSIST_FILE: &str = "consists.json";

/// Highest address usable for an automatically allocated consist.
pub const MAX_CONSIST_ADDRESS: u16 = 127;

/// File name of the document for the consist at `address`.
pub fn consist_file(address: u16) -> String {
    format!("consist-{}.json", address)
}

/// One locomotive in a consist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistMember {
    /// Member locomotive address.
    pub address: u16,
    /// Member runs opposite to the consist direction.
    #[serde(default)]
    pub reversed: bool,
}

impl ConsistMember {
    /// Direction this member must be sent for a consist direction.
    pub fn direction_for(&self, consist_direction: Direction) -> Direction {
        if self.reversed {
            consist_direction.reversed()
        } else {
            consist_direction
        }
    }
}

/// A group address driving a set of member locomotives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consist {
    address: u16,
    #[serde(default)]
    decoder_assisted: bool,
    #[serde(default, rename = "locos")]
    members: Vec<ConsistMember>,
    #[serde(skip)]
    speed: i8,
    #[serde(skip)]
    direction: Direction,
}

impl Consist {
    /// Create an empty consist.
    pub fn new(address: u16, decoder_assisted: bool) -> Self {
        Self {
            address,
            decoder_assisted,
            members: Vec::new(),
            speed: 0,
            direction: Direction::Forward,
        }
    }

    /// Consist (group) address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Whether members are programmed with CV19.
    pub fn is_decoder_assisted(&self) -> bool {
        self.decoder_assisted
    }

    /// Members in the order they joined.
    pub fn members(&self) -> &[ConsistMember] {
        &self.members
    }

    /// Whether `address` is a member.
    pub fn contains(&self, address: u16) -> bool {
        self.members.iter().any(|m| m.address == address)
    }

    /// Current consist speed step.
    pub fn speed(&self) -> i8 {
        self.speed
    }

    /// Current consist direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Name of the document backing this consist.
    pub fn file_name(&self) -> String {
        consist_file(self.address)
    }

    /// Add a member, returning the packets needed to enrol it.
    ///
    /// Re-adding an existing member only updates its polarity.
    pub fn add_member(&mut self, address: u16, reversed: bool) -> Vec<Packet> {
        match self.members.iter_mut().find(|m| m.address == address) {
            Some(member) => member.reversed = reversed,
            None => self.members.push(ConsistMember { address, reversed }),
        }
        if self.decoder_assisted {
            vec![packet::ops_write_cv(
                address,
                CONSIST_ADDRESS_CV,
                self.cv19_value(reversed),
            )]
        } else {
            Vec::new()
        }
    }

    /// Remove a member, returning the packets needed to release it.
    pub fn remove_member(&mut self, address: u16) -> Option<Vec<Packet>> {
        let position = self.members.iter().position(|m| m.address == address)?;
        let member = self.members.remove(position);
        Some(self.release_packets_for(&member))
    }

    /// Packets that release every member, emptying the consist.
    pub fn release_all(&mut self) -> Vec<Packet> {
        let members = std::mem::take(&mut self.members);
        members
            .iter()
            .flat_map(|member| self.release_packets_for(member))
            .collect()
    }

    fn release_packets_for(&self, member: &ConsistMember) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.decoder_assisted {
            packets.push(packet::ops_write_cv(member.address, CONSIST_ADDRESS_CV, 0));
        }
        packets.push(packet::speed_128(member.address, 0, member.direction_for(self.direction)));
        packets
    }

    fn cv19_value(&self, reversed: bool) -> u8 {
        let address = (self.address & 0x7F) as u8;
        if reversed {
            address | 0x80
        } else {
            address
        }
    }

    /// Apply a throttle change and return the packets that carry it.
    pub fn update_throttle(&mut self, speed: i8, direction: Direction) -> Vec<Packet> {
        self.speed = if speed < 0 {
            EMERGENCY_STOP
        } else {
            speed.min(MAX_SPEED_STEP)
        };
        self.direction = direction;
        self.speed_packets()
    }

    /// Force the e-stop sentinel without emitting packets.
    pub(crate) fn mark_emergency_stopped(&mut self) {
        self.speed = EMERGENCY_STOP;
    }

    /// Speed packets for the current consist state.
    pub fn speed_packets(&self) -> Vec<Packet> {
        if self.decoder_assisted {
            vec![packet::speed_128(self.address, self.speed, self.direction)]
        } else {
            self.members
                .iter()
                .map(|m| packet::speed_128(m.address, self.speed, m.direction_for(self.direction)))
                .collect()
        }
    }
}

/// `lococonsists.json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistIndex {
    /// Number of consists listed.
    #[serde(default)]
    pub count: usize,
    /// Per-consist documents.
    #[serde(default)]
    pub consists: Vec<FileRef>,
}

/// Legacy `consists.json` with consists inline.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LegacyConsistDocument {
    /// Number of consists the writer claimed.
    #[serde(default)]
    pub count: usize,
    /// Inline consists.
    #[serde(default)]
    pub consists: Vec<Consist>,
}
