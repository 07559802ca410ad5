/// The 4-byte header in front of every packet: a 3-byte little-endian payload
/// length and a 1-byte sequence id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub payload_length: u32,
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;
    /// Payloads of this length continue in the next packet.
    pub const MAX_PAYLOAD_LENGTH: u32 = 0xff_ffff;

    pub fn new(payload_length: u32, sequence_id: u8) -> Self {
        debug_assert!(payload_length <= Self::MAX_PAYLOAD_LENGTH);
        Self {
            payload_length,
            sequence_id,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }

    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    /// Whether the logical packet continues in a following frame.
    pub fn is_continued(&self) -> bool {
        self.payload_length == Self::MAX_PAYLOAD_LENGTH
    }
}
