// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire-level constants and the RDM header/checksum codec.

use crate::uid::Uid;

pub const DMX_START_CODE: u8 = 0x00;
pub const RDM_START_CODE: u8 = 0xcc;
pub const RDM_SUB_START_CODE: u8 = 0x01;

/// Minimum and maximum RDM message lengths: header (24 bytes, including the
/// two start-code bytes) through at most 231 bytes of parameter data, plus
/// the two checksum bytes.
pub const RDM_HEADER_SIZE: usize = 24;
pub const RDM_MAX_PD_SIZE: usize = 231;
pub const RDM_CHECKSUM_SIZE: usize = 2;
pub const RDM_MAX_PACKET_SIZE: usize = RDM_HEADER_SIZE + RDM_MAX_PD_SIZE + RDM_CHECKSUM_SIZE;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum CommandClass {
    DiscoveryCommand = 0x10,
    DiscoveryCommandResponse = 0x11,
    GetCommand = 0x20,
    GetCommandResponse = 0x21,
    SetCommand = 0x30,
    SetCommandResponse = 0x31,
}

impl CommandClass {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x10 => Self::DiscoveryCommand,
            0x11 => Self::DiscoveryCommandResponse,
            0x20 => Self::GetCommand,
            0x21 => Self::GetCommandResponse,
            0x30 => Self::SetCommand,
            0x31 => Self::SetCommandResponse,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ResponseType {
    Ack = 0x00,
    AckTimer = 0x01,
    NackReason = 0x02,
    AckOverflow = 0x03,
}

impl ResponseType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Ack,
            0x01 => Self::AckTimer,
            0x02 => Self::NackReason,
            0x03 => Self::AckOverflow,
            _ => return None,
        })
    }
}

/// The fixed 24-byte header every RDM packet carries ahead of its
/// parameter data and checksum.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RdmHeader {
    pub message_len: u8,
    pub dest_uid: Uid,
    pub src_uid: Uid,
    pub transaction_num: u8,
    /// Port ID on a request, response type on a response -- same wire
    /// position, interpreted per direction like the original's
    /// `port_id/response_type` union.
    pub port_id_or_response_type: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: u8,
    pub parameter_id: u16,
    pub pdl: u8,
}

impl RdmHeader {
    /// Encodes the header plus `pd` into `out`, computes and appends the
    /// 16-bit big-endian checksum, and returns the total packet length.
    /// `out` must be at least `RDM_HEADER_SIZE + pd.len() + 2` bytes.
    pub fn encode(&self, pd: &[u8], out: &mut [u8]) -> usize {
        debug_assert!(pd.len() <= RDM_MAX_PD_SIZE);
        out[0] = RDM_START_CODE;
        out[1] = RDM_SUB_START_CODE;
        out[2] = self.message_len;
        out[3..9].copy_from_slice(&self.dest_uid.to_be_bytes());
        out[9..15].copy_from_slice(&self.src_uid.to_be_bytes());
        out[15] = self.transaction_num;
        out[16] = self.port_id_or_response_type;
        out[17] = self.message_count;
        out[18..20].copy_from_slice(&self.sub_device.to_be_bytes());
        out[20] = self.command_class;
        out[21..23].copy_from_slice(&self.parameter_id.to_be_bytes());
        out[23] = self.pdl;
        let body_len = RDM_HEADER_SIZE + pd.len();
        out[RDM_HEADER_SIZE..body_len].copy_from_slice(pd);
        let checksum = rdm_checksum(&out[..body_len]);
        out[body_len..body_len + 2].copy_from_slice(&checksum.to_be_bytes());
        body_len + 2
    }

    /// Decodes a header and validates its checksum. Returns the header and
    /// the parameter-data slice on success.
    pub fn decode(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < RDM_HEADER_SIZE + RDM_CHECKSUM_SIZE {
            return None;
        }
        if buf[0] != RDM_START_CODE || buf[1] != RDM_SUB_START_CODE {
            return None;
        }
        let message_len = buf[2];
        let total_len = message_len as usize + RDM_CHECKSUM_SIZE;
        if total_len > buf.len() || total_len < RDM_HEADER_SIZE + RDM_CHECKSUM_SIZE {
            return None;
        }
        let pdl = buf[23];
        if RDM_HEADER_SIZE + pdl as usize + RDM_CHECKSUM_SIZE != total_len {
            return None;
        }
        let expected = rdm_checksum(&buf[..total_len - RDM_CHECKSUM_SIZE]);
        let actual = u16::from_be_bytes([buf[total_len - 2], buf[total_len - 1]]);
        if expected != actual {
            return None;
        }
        let header = RdmHeader {
            message_len,
            dest_uid: Uid::from_be_bytes(buf[3..9].try_into().unwrap()),
            src_uid: Uid::from_be_bytes(buf[9..15].try_into().unwrap()),
            transaction_num: buf[15],
            port_id_or_response_type: buf[16],
            message_count: buf[17],
            sub_device: u16::from_be_bytes([buf[18], buf[19]]),
            command_class: buf[20],
            parameter_id: u16::from_be_bytes([buf[21], buf[22]]),
            pdl,
        };
        Some((header, &buf[RDM_HEADER_SIZE..total_len - RDM_CHECKSUM_SIZE]))
    }
}

/// Sum of all bytes from the start code through the end of parameter data,
/// as a 16-bit value (no final fold -- the RDM checksum is a plain additive
/// sum, not ones-complement).
pub fn rdm_checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Interleaves each byte of `data` as an AND-masked byte (`b | 0xaa`)
/// followed by an OR-masked byte (`b | 0x55`), per the DISC_UNIQUE_BRANCH
/// response encoding. `out` must be at least `2 * data.len()` bytes.
fn interleave(data: &[u8], out: &mut [u8]) {
    for (i, &b) in data.iter().enumerate() {
        out[2 * i] = b | 0xaa;
        out[2 * i + 1] = b | 0x55;
    }
}

/// Recovers the original bytes from an interleaved AND/OR pair stream by
/// ANDing each pair back together.
fn deinterleave(data: &[u8], out: &mut [u8]) {
    for (i, out_byte) in out.iter_mut().enumerate() {
        *out_byte = data[2 * i] & data[2 * i + 1];
    }
}

/// Size of a full DISC_UNIQUE_BRANCH response: 7 `0xfe` bytes, one `0xaa`
/// framing byte, 12 interleaved UID bytes, 4 interleaved checksum bytes.
pub const DISC_RESPONSE_SIZE: usize = 7 + 1 + 12 + 4;

/// Encodes the DISC_UNIQUE_BRANCH response for `uid` into `out` (must be at
/// least [`DISC_RESPONSE_SIZE`] bytes), returning the number of bytes
/// written.
pub fn encode_disc_response(uid: Uid, out: &mut [u8]) -> usize {
    for b in out.iter_mut().take(7) {
        *b = 0xfe;
    }
    out[7] = 0xaa;
    let uid_bytes = uid.to_be_bytes();
    interleave(&uid_bytes, &mut out[8..20]);
    // ANSI E1.20 §7.6.3: the checksum is the sum of the 12 transmitted
    // masked EUID bytes, not the 6 raw UID bytes they're derived from.
    let checksum = rdm_checksum(&out[8..20]);
    interleave(&checksum.to_be_bytes(), &mut out[20..24]);
    DISC_RESPONSE_SIZE
}

/// Parses a DISC_UNIQUE_BRANCH response out of `buf`, which may be
/// preceded by any number of extra `0xfe` preamble bytes (ANSI E1.20
/// allows a variable-length preamble; this implementation scans for the
/// `0xaa` separator). Returns the decoded UID if the interleaved checksum
/// matches.
pub fn decode_disc_response(buf: &[u8]) -> Option<Uid> {
    let sep = buf.iter().position(|&b| b == 0xaa)?;
    let body = &buf[sep + 1..];
    if body.len() < 16 {
        return None;
    }
    let masked_euid = &body[0..12];
    let mut uid_bytes = [0u8; 6];
    deinterleave(masked_euid, &mut uid_bytes);
    let mut checksum_bytes = [0u8; 2];
    deinterleave(&body[12..16], &mut checksum_bytes);
    let checksum = u16::from_be_bytes(checksum_bytes);
    if rdm_checksum(masked_euid) != checksum {
        return None;
    }
    Some(Uid::from_be_bytes(uid_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_round_trip() {
        let header = RdmHeader {
            message_len: (RDM_HEADER_SIZE + 2) as u8,
            dest_uid: Uid::new(0x1234, 1),
            src_uid: Uid::new(0x1234, 2),
            transaction_num: 5,
            port_id_or_response_type: 1,
            message_count: 0,
            sub_device: 0,
            command_class: CommandClass::GetCommand as u8,
            parameter_id: 0x0060,
            pdl: 2,
        };
        let pd = [0xab, 0xcd];
        let mut buf = [0u8; RDM_MAX_PACKET_SIZE];
        let len = header.encode(&pd, &mut buf);
        let (decoded, decoded_pd) = RdmHeader::decode(&buf[..len]).expect("valid packet");
        assert_eq!(decoded, header);
        assert_eq!(decoded_pd, &pd);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let header = RdmHeader {
            message_len: RDM_HEADER_SIZE as u8,
            dest_uid: Uid::BROADCAST_ALL,
            src_uid: Uid::new(1, 1),
            transaction_num: 0,
            port_id_or_response_type: 1,
            message_count: 0,
            sub_device: 0,
            command_class: CommandClass::DiscoveryCommand as u8,
            parameter_id: 0x0001,
            pdl: 0,
        };
        let mut buf = [0u8; RDM_MAX_PACKET_SIZE];
        let len = header.encode(&[], &mut buf);
        buf[len - 1] ^= 0xff;
        assert!(RdmHeader::decode(&buf[..len]).is_none());
    }

    #[test]
    fn disc_response_round_trip() {
        let uid = Uid::new(0x4344, 0x12345678);
        let mut buf = [0u8; DISC_RESPONSE_SIZE];
        let len = encode_disc_response(uid, &mut buf);
        assert_eq!(len, DISC_RESPONSE_SIZE);
        assert_eq!(decode_disc_response(&buf), Some(uid));
    }

    #[test]
    fn disc_response_matches_ansi_e1_20_worked_example() {
        // UID 00:01:02:03:04:05, checksum 0x000f.
        let uid = Uid::new(0x0001, 0x02030405);
        let mut buf = [0u8; DISC_RESPONSE_SIZE];
        encode_disc_response(uid, &mut buf);
        assert_eq!(&buf[0..7], &[0xfe; 7]);
        assert_eq!(buf[7], 0xaa);
        assert_eq!(buf[8], 0x00 | 0xaa);
        assert_eq!(buf[9], 0x00 | 0x55);
    }
}
