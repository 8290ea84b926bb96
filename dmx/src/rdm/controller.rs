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

//! RDM controller: composes and sends a single request/response transaction,
//! grounded on `rdm_send_request` in
//! `examples/original_source/src/rdm/controller/utils.c` -- same
//! snapshot/restore-on-every-exit-path structure, same 23ms turnaround
//! window, same `ACK_TIMER` 10ms-unit scaling.

use core::sync::atomic::Ordering;

use crate::config::DMX_PACKET_SIZE_MAX;
use crate::driver::{DmxDriver, Timeout};
use crate::error::{PacketError, RdmResponseType};
use crate::frame::{CommandClass, RdmHeader, ResponseType, RDM_MAX_PD_SIZE};
use crate::hal::{TimerHal, UartHal};
use crate::sync::Rtos;
use crate::uid::Uid;

/// Every sub-device, used as a `RdmRequest::sub_device` broadcast target
/// (only valid with `CommandClass::SetCommand`, per ANSI E1.20).
pub const RDM_SUB_DEVICE_ALL: u16 = 0xffff;

/// The controller's turnaround wait: how long `rdm_send_request` blocks for
/// a responder's reply before giving up, at most 23ms.
pub const RDM_TURNAROUND_TIMEOUT_MS: u32 = 23;

/// A single outbound RDM transaction.
pub struct RdmRequest<'a> {
    pub dest_uid: Uid,
    pub sub_device: u16,
    pub cc: CommandClass,
    pub pid: u16,
    pub pd: &'a [u8],
}

/// Outcome of [`DmxDriver::rdm_send_request`]: the decoded response, or the
/// reason there isn't one.
#[derive(Debug, Clone, Copy)]
pub struct RdmAck {
    pub kind: RdmResponseType,
    pub err: PacketError,
    pub size: usize,
    pub src_uid: Uid,
    pub pid: u16,
    pub message_count: u8,
    pub pdl: u8,
    /// Estimated additional response delay for `ACK_TIMER`, in
    /// milliseconds (the original's `timer * 10`).
    pub timer_ms: u32,
    pub nack_reason: u16,
}

impl RdmAck {
    fn none(err: PacketError, size: usize) -> Self {
        Self { kind: RdmResponseType::None, err, size, src_uid: Uid::from_raw(0), pid: 0, message_count: 0, pdl: 0, timer_ms: 0, nack_reason: 0 }
    }
}

impl<U: UartHal, T: TimerHal, R: Rtos> DmxDriver<U, T, R> {
    fn next_transaction_num(&self) -> u8 { self.rdm_tn.fetch_add(1, Ordering::AcqRel) }

    /// Sends one RDM request and waits for the response. Snapshots the
    /// packet buffer before composing the request and
    /// restores it on every exit path, so an in-flight lighting frame
    /// written by `write` survives a transaction run from another task.
    pub fn rdm_send_request(&self, req: &RdmRequest, pd_out: &mut [u8]) -> RdmAck {
        if req.pd.len() > RDM_MAX_PD_SIZE {
            return RdmAck::none(PacketError::Ok, 0);
        }

        let _guard = self.mutex.lock(&self.rtos);
        let turnaround = Timeout::Micros(RDM_TURNAROUND_TIMEOUT_MS * 1000);

        if !self.wait_sent(turnaround) {
            return RdmAck::none(PacketError::Ok, 0);
        }

        let header = RdmHeader {
            message_len: (crate::frame::RDM_HEADER_SIZE + req.pd.len()) as u8,
            dest_uid: req.dest_uid,
            src_uid: self.rdm_uid(),
            transaction_num: self.next_transaction_num(),
            port_id_or_response_type: self.port().0 + 1,
            message_count: 0,
            sub_device: req.sub_device,
            command_class: req.cc as u8,
            parameter_id: req.pid,
            pdl: req.pd.len() as u8,
        };

        let (saved, saved_tx_size) = self.snapshot_buffer();
        let mut frame = [0u8; DMX_PACKET_SIZE_MAX];
        let n = header.encode(req.pd, &mut frame);
        self.load_and_checksum(&frame[..n]);

        if self.send(n, turnaround).is_err() {
            self.restore_buffer(&saved, saved_tx_size);
            return RdmAck::none(PacketError::Ok, 0);
        }

        let is_broadcast = req.dest_uid == Uid::BROADCAST_ALL || req.dest_uid.is_broadcast();
        if is_broadcast && req.pid != crate::rdm::responder::pid::DISC_UNIQUE_BRANCH {
            // No response is expected for a broadcast request (other than
            // discovery): wait for the request itself to clear the wire,
            // then restore the caller's buffer.
            self.wait_sent(turnaround);
            self.restore_buffer(&saved, saved_tx_size);
            return RdmAck::none(PacketError::Ok, 0);
        }

        let packet = match self.receive(turnaround) {
            Ok(p) => p,
            Err(_) => {
                self.restore_buffer(&saved, saved_tx_size);
                return RdmAck::none(PacketError::Timeout, 0);
            }
        };

        if packet.size == 0 {
            self.restore_buffer(&saved, saved_tx_size);
            return RdmAck::none(packet.err, 0);
        }

        let mut response_buf = [0u8; DMX_PACKET_SIZE_MAX];
        let response_len = self.read(&mut response_buf[..packet.size]);
        let Some((resp_header, resp_pd)) = RdmHeader::decode(&response_buf[..response_len]) else {
            self.restore_buffer(&saved, saved_tx_size);
            return RdmAck { kind: RdmResponseType::Invalid, ..RdmAck::none(packet.err, packet.size) };
        };

        let mut ack = RdmAck {
            kind: RdmResponseType::Invalid,
            err: packet.err,
            size: packet.size,
            src_uid: resp_header.src_uid,
            pid: resp_header.parameter_id,
            message_count: resp_header.message_count,
            pdl: resp_header.pdl,
            timer_ms: 0,
            nack_reason: 0,
        };

        match ResponseType::from_u8(resp_header.port_id_or_response_type) {
            Some(ResponseType::Ack) => {
                ack.kind = RdmResponseType::Ack;
                if resp_header.parameter_id != crate::rdm::responder::pid::DISC_UNIQUE_BRANCH {
                    let n = resp_pd.len().min(pd_out.len());
                    pd_out[..n].copy_from_slice(&resp_pd[..n]);
                }
            }
            Some(ResponseType::AckTimer) => {
                ack.kind = RdmResponseType::AckTimer;
                if resp_pd.len() >= 2 {
                    let timer = u16::from_be_bytes([resp_pd[0], resp_pd[1]]);
                    ack.timer_ms = timer as u32 * 10;
                }
            }
            Some(ResponseType::NackReason) => {
                ack.kind = RdmResponseType::NackReason;
                if resp_pd.len() >= 2 {
                    ack.nack_reason = u16::from_be_bytes([resp_pd[0], resp_pd[1]]);
                }
            }
            Some(ResponseType::AckOverflow) => {
                ack.kind = RdmResponseType::AckOverflow;
            }
            None => ack.kind = RdmResponseType::Invalid,
        }

        self.restore_buffer(&saved, saved_tx_size);
        ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_none_has_no_response_kind() {
        let ack = RdmAck::none(PacketError::Ok, 0);
        assert_eq!(ack.kind, RdmResponseType::None);
        assert_eq!(ack.size, 0);
    }
}
