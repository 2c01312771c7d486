//! Message Types for Controller-Terminal Signalling
//!
//! Defines the Terminal Burst Time Plan (TBTP) and the control tag used to
//! reference it. The TBTP wire layout is big-endian:
//!
//! ```text
//! u8   superframe sequence id
//! u32  superframe counter
//! u16  terminal count
//!      per terminal:
//!        [u8; 6]  MAC address
//!        u16      slot count
//!                 per slot: u8 frame id, u16 time slot index
//! ```

use crate::InterfaceError;
use bytes::{BufMut, Bytes, BytesMut};
use common::types::MacAddress;
use nom::{
    bytes::complete::take,
    multi::count,
    number::complete::{be_u16, be_u32, be_u8},
    sequence::tuple,
    IResult,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Control message types carried in a control tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum ControlMsgType {
    /// Not a control message
    NonCtrl = 0,
    /// Terminal burst time plan
    Tbtp = 1,
    /// Random access load control
    RandomAccess = 2,
    /// Capacity request
    CapacityRequest = 3,
}

impl ControlMsgType {
    /// Decode the on-air type code
    pub fn from_code(code: u8) -> Result<Self, InterfaceError> {
        <Self as FromPrimitive>::from_u8(code).ok_or(InterfaceError::UnknownMessageType(code))
    }
}

/// Tag attached to a delivered control packet, referencing a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMsgTag {
    /// Message type
    pub msg_type: ControlMsgType,
    /// Id in the control message store
    pub msg_id: u32,
}

/// One dedicated-access time slot assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaTimeSlot {
    /// Frame id within the superframe
    pub frame_id: u8,
    /// Time slot index within the frame
    pub slot_index: u16,
}

/// Terminal Burst Time Plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbtpMessage {
    /// Superframe sequence id
    superframe_seq_id: u8,
    /// Superframe instance counter this plan applies to
    superframe_counter: u32,
    /// Per-terminal slot assignments, in assignment order
    da_slots: BTreeMap<MacAddress, Vec<DaTimeSlot>>,
}

impl TbtpMessage {
    /// Create an empty plan for one superframe instance
    pub fn new(superframe_seq_id: u8, superframe_counter: u32) -> Self {
        Self {
            superframe_seq_id,
            superframe_counter,
            da_slots: BTreeMap::new(),
        }
    }

    /// Superframe sequence id
    pub fn superframe_seq_id(&self) -> u8 {
        self.superframe_seq_id
    }

    /// Superframe instance counter
    pub fn superframe_counter(&self) -> u32 {
        self.superframe_counter
    }

    /// Append a slot assignment for `address`
    pub fn add_da_slot(&mut self, address: MacAddress, frame_id: u8, slot_index: u16) {
        self.da_slots
            .entry(address)
            .or_default()
            .push(DaTimeSlot { frame_id, slot_index });
    }

    /// Slot assignments for `address`, empty if it has none
    pub fn da_time_slots(&self, address: &MacAddress) -> &[DaTimeSlot] {
        self.da_slots.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Terminals that received slots
    pub fn terminals(&self) -> impl Iterator<Item = &MacAddress> {
        self.da_slots.keys()
    }

    /// Total number of assigned slots
    pub fn slot_count(&self) -> usize {
        self.da_slots.values().map(Vec::len).sum()
    }

    /// Encode to the wire layout.
    ///
    /// Fails when the terminal count or a terminal's slot count does not fit
    /// its 16-bit count field.
    pub fn encode(&self) -> Result<Bytes, InterfaceError> {
        let terminal_count = wire_count(self.da_slots.len(), "terminals")?;
        let mut buffer = BytesMut::with_capacity(7 + self.da_slots.len() * 8 + self.slot_count() * 3);

        buffer.put_u8(self.superframe_seq_id);
        buffer.put_u32(self.superframe_counter);
        buffer.put_u16(terminal_count);

        for (address, slots) in &self.da_slots {
            buffer.put_slice(&address.octets());
            buffer.put_u16(wire_count(slots.len(), "slots for one terminal")?);
            for slot in slots {
                buffer.put_u8(slot.frame_id);
                buffer.put_u16(slot.slot_index);
            }
        }

        trace!("Encoded TBTP {}: {}", self.superframe_counter, common::bytes_to_hex(&buffer));
        Ok(buffer.freeze())
    }

    /// Decode from the wire layout.
    ///
    /// Rejects trailing bytes, repeated terminals and terminals whose slots
    /// span more than one frame.
    pub fn decode(data: &[u8]) -> Result<Self, InterfaceError> {
        let (rest, (superframe_seq_id, superframe_counter, terminals)) =
            parse_tbtp(data).map_err(|e| InterfaceError::InvalidMessage(e.to_string()))?;

        if !rest.is_empty() {
            return Err(InterfaceError::InvalidMessage(format!("{} trailing bytes", rest.len())));
        }

        let mut tbtp = Self::new(superframe_seq_id, superframe_counter);
        for (address, slots) in terminals {
            if let Some(first) = slots.first() {
                if slots.iter().any(|s| s.frame_id != first.frame_id) {
                    return Err(InterfaceError::InvalidMessage(format!(
                        "slots for {} span several frames",
                        address
                    )));
                }
            }
            if tbtp.da_slots.insert(address, slots).is_some() {
                return Err(InterfaceError::InvalidMessage(format!("terminal {} repeated", address)));
            }
        }

        Ok(tbtp)
    }

}

fn wire_count(count: usize, what: &'static str) -> Result<u16, InterfaceError> {
    u16::try_from(count).map_err(|_| InterfaceError::TooManyEntries { what, count })
}

fn parse_address(input: &[u8]) -> IResult<&[u8], MacAddress> {
    let (input, raw) = take(6usize)(input)?;
    let mut octets = [0u8; 6];
    octets.copy_from_slice(raw);
    Ok((input, MacAddress(octets)))
}

fn parse_slot(input: &[u8]) -> IResult<&[u8], DaTimeSlot> {
    let (input, (frame_id, slot_index)) = tuple((be_u8, be_u16))(input)?;
    Ok((input, DaTimeSlot { frame_id, slot_index }))
}

fn parse_terminal(input: &[u8]) -> IResult<&[u8], (MacAddress, Vec<DaTimeSlot>)> {
    let (input, address) = parse_address(input)?;
    let (input, slot_count) = be_u16(input)?;
    let (input, slots) = count(parse_slot, slot_count as usize)(input)?;
    Ok((input, (address, slots)))
}

#[allow(clippy::type_complexity)]
fn parse_tbtp(input: &[u8]) -> IResult<&[u8], (u8, u32, Vec<(MacAddress, Vec<DaTimeSlot>)>)> {
    let (input, (seq_id, counter, terminal_count)) = tuple((be_u8, be_u32, be_u16))(input)?;
    let (input, terminals) = count(parse_terminal, terminal_count as usize)(input)?;
    Ok((input, (seq_id, counter, terminals)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tbtp() -> TbtpMessage {
        let mut tbtp = TbtpMessage::new(0, 0x0102_0304);
        tbtp.add_da_slot(MacAddress::from_index(1), 2, 5);
        tbtp.add_da_slot(MacAddress::from_index(1), 2, 6);
        tbtp.add_da_slot(MacAddress::from_index(7), 0, 300);
        tbtp
    }

    #[test]
    fn test_tbtp_wire_layout() {
        let encoded = sample_tbtp().encode().unwrap();

        assert_eq!(&encoded[..7], &[0x00, 0x01, 0x02, 0x03, 0x04, 0x00, 0x02]);
        // First terminal: address, two slots in frame 2
        assert_eq!(&encoded[7..13], &[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&encoded[13..21], &[0x00, 0x02, 0x02, 0x00, 0x05, 0x02, 0x00, 0x06]);
        // Second terminal: one slot, index 300 = 0x012c
        assert_eq!(&encoded[27..32], &[0x00, 0x01, 0x00, 0x01, 0x2c]);
        assert_eq!(encoded.len(), 32);
    }

    #[test]
    fn test_tbtp_decode_matches_source() {
        let tbtp = sample_tbtp();
        let decoded = TbtpMessage::decode(&tbtp.encode().unwrap()).unwrap();

        assert_eq!(decoded.superframe_counter(), 0x0102_0304);
        assert_eq!(
            decoded.da_time_slots(&MacAddress::from_index(1)),
            &[DaTimeSlot { frame_id: 2, slot_index: 5 }, DaTimeSlot { frame_id: 2, slot_index: 6 }]
        );
        assert!(decoded.da_time_slots(&MacAddress::from_index(3)).is_empty());
        assert_eq!(decoded.slot_count(), 3);
    }

    #[test]
    fn test_tbtp_decode_rejects_bad_input() {
        let encoded = sample_tbtp().encode().unwrap();

        // Truncated
        assert!(TbtpMessage::decode(&encoded[..encoded.len() - 1]).is_err());

        // Trailing garbage
        let mut long = encoded.to_vec();
        long.push(0);
        assert!(TbtpMessage::decode(&long).is_err());

        // Mixed frame ids for one terminal
        let mut mixed = TbtpMessage::new(0, 1);
        mixed.add_da_slot(MacAddress::from_index(1), 2, 0);
        mixed.add_da_slot(MacAddress::from_index(1), 3, 0);
        assert!(matches!(
            TbtpMessage::decode(&mixed.encode().unwrap()),
            Err(InterfaceError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_control_msg_type_codes() {
        assert_eq!(ControlMsgType::from_code(1).unwrap(), ControlMsgType::Tbtp);
        assert!(matches!(
            ControlMsgType::from_code(9),
            Err(InterfaceError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn test_tbtp_encode_rejects_count_overflow() {
        let address = MacAddress::from_index(1);
        let mut tbtp = TbtpMessage::new(0, 1);
        for slot in 0..u16::MAX {
            tbtp.add_da_slot(address, 0, slot);
        }

        // 65535 slots is the most the count field can carry
        let encoded = tbtp.encode().unwrap();
        assert_eq!(&encoded[13..15], &[0xFF, 0xFF]);
        assert_eq!(TbtpMessage::decode(&encoded).unwrap().slot_count(), 65535);

        tbtp.add_da_slot(address, 0, u16::MAX);
        assert!(matches!(
            tbtp.encode(),
            Err(InterfaceError::TooManyEntries { count: 65536, .. })
        ));
    }
}
