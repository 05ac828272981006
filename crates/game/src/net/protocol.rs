use glam::Vec3;

use crate::input::{InputRecord, read_runs};
use crate::sequence::TimeStep;
use crate::world::NetworkId;

use super::buffer::{PacketReader, PacketWriter};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 31234;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Join = 1,
    Input = 2,
    ObjectList = 3,
    ObjectUpdates = 4,
    ObjectDelete = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Join),
            2 => Ok(Self::Input),
            3 => Ok(Self::ObjectList),
            4 => Ok(Self::ObjectUpdates),
            5 => Ok(Self::ObjectDelete),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("packet truncated")]
    Truncated,
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("unexpected packet type {0:?}")]
    Unexpected(PacketType),
    #[error("string is not valid utf-8")]
    InvalidString,
    #[error("update references unknown object {0}")]
    UnknownObject(NetworkId),
    #[error("protocol id mismatch: {0:#010x}")]
    ProtocolMismatch(u32),
    #[error("unknown datagram kind {0}")]
    UnknownKind(u8),
}

/// Client asks to enter a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPacket {
    pub map_name: String,
}

impl JoinPacket {
    pub fn encode(&self) -> PacketWriter {
        let mut writer = PacketWriter::new(PacketType::Join);
        writer.write_cstring(&self.map_name);
        writer
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            map_name: reader.read_cstring()?,
        })
    }
}

/// Decoded client input window. The encoder lives on
/// [`Controller::network_serialize_history`](crate::components::Controller::network_serialize_history).
#[derive(Debug, Clone, PartialEq)]
pub struct InputPacket {
    pub rotation: f32,
    pub base_time: TimeStep,
    pub records: Vec<InputRecord>,
}

impl InputPacket {
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let rotation = reader.read_f32()?;
        let base_time = reader.read_u16()?;
        let records = read_runs(base_time, reader)?;

        Ok(Self {
            rotation,
            base_time,
            records,
        })
    }
}

/// Per-object payload shared by the update and list packets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectState {
    pub id: NetworkId,
    pub controller_ack: Option<TimeStep>,
    pub position: Vec3,
    pub rotation: f32,
}

impl ObjectState {
    fn write_body(&self, writer: &mut PacketWriter) {
        if let Some(ack) = self.controller_ack {
            writer.write_u16(ack);
        }
        writer.write_vec2(self.position);
        writer.write_f32(self.rotation);
    }

    fn read_body(
        reader: &mut PacketReader<'_>,
        id: NetworkId,
        controlled: bool,
    ) -> Result<Self, PacketError> {
        let controller_ack = if controlled {
            Some(reader.read_u16()?)
        } else {
            None
        };

        Ok(Self {
            id,
            controller_ack,
            position: reader.read_vec2()?,
            rotation: reader.read_f32()?,
        })
    }
}

/// Incremental state broadcast, tagged with the server tick it was taken on.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdatesPacket {
    pub map_id: u16,
    pub server_time_step: TimeStep,
    pub objects: Vec<ObjectState>,
}

impl ObjectUpdatesPacket {
    pub fn encode(&self) -> PacketWriter {
        let mut writer = PacketWriter::new(PacketType::ObjectUpdates);
        writer.write_u16(self.map_id);
        writer.write_u16(self.server_time_step);
        writer.write_u16(self.objects.len() as u16);

        for object in &self.objects {
            writer.write_u16(object.id);
            object.write_body(&mut writer);
        }

        writer
    }

    /// `controlled` reports whether a known object carries a controller;
    /// `None` means the id is unknown and the rest of the packet cannot be
    /// framed.
    pub fn decode<F>(reader: &mut PacketReader<'_>, controlled: F) -> Result<Self, PacketError>
    where
        F: Fn(NetworkId) -> Option<bool>,
    {
        let map_id = reader.read_u16()?;
        let server_time_step = reader.read_u16()?;
        let count = reader.read_u16()?;

        let mut objects = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_u16()?;
            let is_controlled = controlled(id).ok_or(PacketError::UnknownObject(id))?;
            objects.push(ObjectState::read_body(reader, id, is_controlled)?);
        }

        Ok(Self {
            map_id,
            server_time_step,
            objects,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSpawn {
    pub identifier: String,
    pub state: ObjectState,
}

impl ObjectSpawn {
    fn encoded_len(&self) -> usize {
        let ack = if self.state.controller_ack.is_some() { 2 } else { 0 };
        // id, nul-terminated identifier, controlled flag, ack, position, rotation
        2 + self.identifier.len() + 1 + 1 + ack + 8 + 4
    }
}

/// Type byte plus map id, time step, client object id and count.
const OBJECT_LIST_HEADER: usize = 1 + 2 + 2 + 2 + 2;

/// Full object list sent once when a client enters a map.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectListPacket {
    pub map_id: u16,
    pub server_time_step: TimeStep,
    pub client_object_id: NetworkId,
    pub objects: Vec<ObjectSpawn>,
}

impl ObjectListPacket {
    pub fn encode(&self) -> PacketWriter {
        let mut writer = PacketWriter::new(PacketType::ObjectList);
        writer.write_u16(self.map_id);
        writer.write_u16(self.server_time_step);
        writer.write_u16(self.client_object_id);
        writer.write_u16(self.objects.len() as u16);

        for spawn in &self.objects {
            writer.write_u16(spawn.state.id);
            writer.write_cstring(&spawn.identifier);
            writer.write_bool(spawn.state.controller_ack.is_some());
            spawn.state.write_body(&mut writer);
        }

        writer
    }

    /// Splits into lists that each encode to at most `max_size` bytes. Every
    /// part repeats the map, time step and client object id; an empty list
    /// still yields one part.
    pub fn split(self, max_size: usize) -> Vec<ObjectListPacket> {
        let Self {
            map_id,
            server_time_step,
            client_object_id,
            objects,
        } = self;
        let part = |objects: Vec<ObjectSpawn>| ObjectListPacket {
            map_id,
            server_time_step,
            client_object_id,
            objects,
        };

        let mut parts = Vec::new();
        let mut current = Vec::new();
        let mut size = OBJECT_LIST_HEADER;

        for spawn in objects {
            let len = spawn.encoded_len();
            if !current.is_empty() && size + len > max_size {
                parts.push(part(std::mem::take(&mut current)));
                size = OBJECT_LIST_HEADER;
            }
            size += len;
            current.push(spawn);
        }

        if !current.is_empty() || parts.is_empty() {
            parts.push(part(current));
        }
        parts
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let map_id = reader.read_u16()?;
        let server_time_step = reader.read_u16()?;
        let client_object_id = reader.read_u16()?;
        let count = reader.read_u16()?;

        let mut objects = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_u16()?;
            let identifier = reader.read_cstring()?;
            let controlled = reader.read_bool()?;
            let state = ObjectState::read_body(reader, id, controlled)?;
            objects.push(ObjectSpawn { identifier, state });
        }

        Ok(Self {
            map_id,
            server_time_step,
            client_object_id,
            objects,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDeletePacket {
    pub id: NetworkId,
}

impl ObjectDeletePacket {
    pub fn encode(&self) -> PacketWriter {
        let mut writer = PacketWriter::new(PacketType::ObjectDelete);
        writer.write_u16(self.id);
        writer
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            id: reader.read_u16()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_layout_matches_wire_format() {
        let packet = ObjectUpdatesPacket {
            map_id: 2,
            server_time_step: 300,
            objects: vec![
                ObjectState {
                    id: 7,
                    controller_ack: Some(41),
                    position: Vec3::new(1.5, -2.0, 0.0),
                    rotation: 90.0,
                },
                ObjectState {
                    id: 9,
                    controller_ack: None,
                    position: Vec3::ZERO,
                    rotation: 0.0,
                },
            ],
        };

        let bytes = packet.encode().into_bytes();
        // type + header + controlled object + plain object
        assert_eq!(bytes.len(), 1 + 6 + (2 + 2 + 8 + 4) + (2 + 8 + 4));

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_type().unwrap(), PacketType::ObjectUpdates);
        let decoded = ObjectUpdatesPacket::decode(&mut reader, |id| Some(id == 7)).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn update_with_unknown_object_is_rejected() {
        let packet = ObjectUpdatesPacket {
            map_id: 0,
            server_time_step: 1,
            objects: vec![ObjectState {
                id: 3,
                controller_ack: None,
                position: Vec3::ZERO,
                rotation: 0.0,
            }],
        };
        let bytes = packet.encode().into_bytes();
        let mut reader = PacketReader::new(&bytes);
        reader.read_type().unwrap();

        let result = ObjectUpdatesPacket::decode(&mut reader, |_| None);
        assert!(matches!(result, Err(PacketError::UnknownObject(3))));
    }

    #[test]
    fn object_list_carries_identifiers() {
        let packet = ObjectListPacket {
            map_id: 1,
            server_time_step: 10,
            client_object_id: 4,
            objects: vec![ObjectSpawn {
                identifier: "player".into(),
                state: ObjectState {
                    id: 4,
                    controller_ack: Some(0),
                    position: Vec3::new(3.0, 4.0, 0.0),
                    rotation: 180.0,
                },
            }],
        };

        let bytes = packet.encode().into_bytes();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_type().unwrap(), PacketType::ObjectList);
        assert_eq!(ObjectListPacket::decode(&mut reader).unwrap(), packet);
    }

    #[test]
    fn large_object_list_splits_under_limit() {
        let objects: Vec<ObjectSpawn> = (1..=80)
            .map(|id| ObjectSpawn {
                identifier: "crate".into(),
                state: ObjectState {
                    id,
                    controller_ack: (id == 80).then_some(3),
                    position: Vec3::new(id as f32, 1.0, 0.0),
                    rotation: 0.0,
                },
            })
            .collect();
        let packet = ObjectListPacket {
            map_id: 2,
            server_time_step: 77,
            client_object_id: 80,
            objects: objects.clone(),
        };

        let parts = packet.split(MAX_PACKET_SIZE);
        assert!(parts.len() > 1);

        let mut rejoined = Vec::new();
        for part in parts {
            let bytes = part.encode().into_bytes();
            assert!(bytes.len() <= MAX_PACKET_SIZE, "{} bytes", bytes.len());
            assert_eq!(bytes.len(), OBJECT_LIST_HEADER + part.objects.iter().map(ObjectSpawn::encoded_len).sum::<usize>());
            assert_eq!((part.map_id, part.server_time_step, part.client_object_id), (2, 77, 80));
            rejoined.extend(part.objects);
        }
        assert_eq!(rejoined, objects);
    }

    #[test]
    fn empty_object_list_still_sends_one_part() {
        let packet = ObjectListPacket {
            map_id: 0,
            server_time_step: 1,
            client_object_id: 3,
            objects: Vec::new(),
        };
        assert_eq!(packet.clone().split(MAX_PACKET_SIZE), vec![packet]);
    }

    #[test]
    fn truncated_update_is_an_error() {
        let bytes = [PacketType::ObjectUpdates as u8, 0, 0, 1];
        let mut reader = PacketReader::new(&bytes);
        reader.read_type().unwrap();
        assert!(matches!(
            ObjectUpdatesPacket::decode(&mut reader, |_| Some(false)),
            Err(PacketError::Truncated)
        ));
    }

    #[test]
    fn unknown_type_byte() {
        assert!(matches!(PacketType::try_from(0xEE), Err(PacketError::UnknownType(0xEE))));
    }
}
