//! MAC-command byte encoding/decoding for FOpts and FPort-0 FRMPayload.
//!
//! Only the CIDs this core negotiates (`mac::commands::Cid`) are encoded or
//! decoded; an unrecognized CID byte stops decoding for the remainder of
//! the buffer rather than guessing a length, the same defensive stance the
//! teacher's frame decoders take on an unrecognized DIF/VIF byte.

use crate::error::NsError;
use crate::mac::commands::{DevStatusAns, LinkAdrAns, NewChannelAns, PingSlotChannelAns, RxParamSetupAns};
use crate::mac::engine::{ResponseCommand, UplinkMacCommand};

const CID_LINK_CHECK: u8 = 0x02;
const CID_LINK_ADR: u8 = 0x03;
const CID_RX_PARAM_SETUP: u8 = 0x05;
const CID_DEV_STATUS: u8 = 0x06;
const CID_NEW_CHANNEL: u8 = 0x07;
const CID_DEVICE_TIME: u8 = 0x0D;
const CID_PING_SLOT_CHANNEL: u8 = 0x11;

/// Decodes the answer/request commands carried in `fopts`, plus the FPort-0
/// FRMPayload when MAC commands are piggy-backed there instead.
pub fn decode_uplink_commands(
    fopts: &[u8],
    f_port: Option<u8>,
    frm_payload: &[u8],
) -> Result<Vec<UplinkMacCommand>, NsError> {
    let mut commands = Vec::new();
    decode_into(fopts, &mut commands)?;
    if f_port == Some(0) {
        decode_into(frm_payload, &mut commands)?;
    }
    Ok(commands)
}

fn decode_into(buf: &[u8], out: &mut Vec<UplinkMacCommand>) -> Result<(), NsError> {
    let mut pos = 0;
    while pos < buf.len() {
        let cid = buf[pos];
        pos += 1;
        match cid {
            CID_LINK_CHECK => out.push(UplinkMacCommand::LinkCheckReq),
            CID_DEVICE_TIME => out.push(UplinkMacCommand::DeviceTimeReq),
            CID_LINK_ADR => {
                let b = take(buf, &mut pos, 1)?[0];
                out.push(UplinkMacCommand::LinkAdrAns(LinkAdrAns {
                    channel_mask_ack: b & 0x01 != 0,
                    data_rate_ack: b & 0x02 != 0,
                    power_ack: b & 0x04 != 0,
                }));
            }
            CID_RX_PARAM_SETUP => {
                let b = take(buf, &mut pos, 1)?[0];
                out.push(UplinkMacCommand::RxParamSetupAns(RxParamSetupAns {
                    channel_ack: b & 0x01 != 0,
                    rx2_data_rate_ack: b & 0x02 != 0,
                    rx1_dr_offset_ack: b & 0x04 != 0,
                }));
            }
            CID_DEV_STATUS => {
                let b = take(buf, &mut pos, 2)?;
                out.push(UplinkMacCommand::DevStatusAns(DevStatusAns { battery: b[0], margin: b[1] as i8 }));
            }
            CID_NEW_CHANNEL => {
                let b = take(buf, &mut pos, 1)?[0];
                out.push(UplinkMacCommand::NewChannelAns(NewChannelAns {
                    frequency_ok: b & 0x01 != 0,
                    data_rate_range_ok: b & 0x02 != 0,
                }));
            }
            CID_PING_SLOT_CHANNEL => {
                let b = take(buf, &mut pos, 1)?[0];
                out.push(UplinkMacCommand::PingSlotChannelAns(PingSlotChannelAns {
                    data_rate_ok: b & 0x01 != 0,
                    channel_frequency_ok: b & 0x02 != 0,
                }));
            }
            other => {
                return Err(NsError::BadArgument(format!("unrecognized MAC command CID {other:#x}")));
            }
        }
    }
    Ok(())
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], NsError> {
    if *pos + len > buf.len() {
        return Err(NsError::BadArgument("MAC command truncated".into()));
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

/// Encodes the engine's response commands as an FPort-0 FRMPayload. Empty
/// when there is nothing to send — callers decide whether a downlink is
/// needed at all.
pub fn encode_mac_answer_fport(commands: &[ResponseCommand]) -> Vec<u8> {
    let mut out = Vec::new();
    for cmd in commands {
        match cmd {
            ResponseCommand::LinkAdrReq(req) => {
                out.push(CID_LINK_ADR);
                let mut mask: u16 = 0;
                for (i, enabled) in req.ch_mask.iter().enumerate().take(16) {
                    if *enabled {
                        mask |= 1 << i;
                    }
                }
                out.extend_from_slice(&mask.to_le_bytes());
                out.push((req.data_rate << 4) | (req.tx_power & 0x0F));
                out.push(req.nb_rep);
            }
            ResponseCommand::PingSlotChannelReq(req) => {
                out.push(CID_PING_SLOT_CHANNEL);
                out.extend_from_slice(&req.frequency_hz.to_le_bytes()[..3]);
                out.push(req.data_rate);
            }
            ResponseCommand::RxParamSetupReq(req) => {
                out.push(CID_RX_PARAM_SETUP);
                out.push((req.rx1_dr_offset << 4) | (req.rx2_data_rate & 0x0F));
                out.extend_from_slice(&req.rx2_frequency_hz.to_le_bytes()[..3]);
            }
            ResponseCommand::NewChannelReq(req) => {
                out.push(CID_NEW_CHANNEL);
                out.push(req.ch_index);
                out.extend_from_slice(&req.frequency_hz.to_le_bytes()[..3]);
                out.push((req.max_dr << 4) | (req.min_dr & 0x0F));
            }
            ResponseCommand::DevStatusReq => out.push(CID_DEV_STATUS),
            ResponseCommand::DeviceTimeAns(ans) => {
                out.push(CID_DEVICE_TIME);
                out.extend_from_slice(&ans.seconds_since_gps_epoch.to_le_bytes());
                out.push(ans.fractional_second);
            }
            ResponseCommand::LinkCheckAns(ans) => {
                out.push(CID_LINK_CHECK);
                out.push(ans.margin_db.clamp(0, 255) as u8);
                out.push(ans.gateway_count);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::commands::LinkAdrReq;

    #[test]
    fn decodes_link_adr_ans_ack_bits() {
        let fopts = vec![CID_LINK_ADR, 0b0000_0111];
        let cmds = decode_uplink_commands(&fopts, None, &[]).unwrap();
        assert_eq!(cmds.len(), 1);
        match &cmds[0] {
            UplinkMacCommand::LinkAdrAns(ans) => {
                assert!(ans.channel_mask_ack && ans.data_rate_ack && ans.power_ack);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn truncated_command_errors() {
        let fopts = vec![CID_LINK_ADR];
        assert!(decode_uplink_commands(&fopts, None, &[]).is_err());
    }

    #[test]
    fn encodes_link_adr_req_roundtrippable_length() {
        let commands = vec![ResponseCommand::LinkAdrReq(LinkAdrReq {
            ch_mask: vec![true, true, false],
            data_rate: 5,
            tx_power: 3,
            nb_rep: 2,
        })];
        let encoded = encode_mac_answer_fport(&commands);
        assert_eq!(encoded.len(), 1 + 2 + 1 + 1);
        assert_eq!(encoded[0], CID_LINK_ADR);
    }
}
