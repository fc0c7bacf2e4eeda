//! MHDR/FHDR parsing for data-up frames.

use crate::constants::MHDR_MTYPE_MASK;
use crate::error::NsError;
use crate::types::{DevAddr, FCtrl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    RejoinRequest,
    UnconfirmedDataUp,
    ConfirmedDataUp,
    Proprietary,
    Other(u8),
}

impl MType {
    pub fn from_mhdr(byte: u8) -> Self {
        match (byte & MHDR_MTYPE_MASK) >> 5 {
            0 => MType::JoinRequest,
            2 => MType::UnconfirmedDataUp,
            4 => MType::ConfirmedDataUp,
            6 => MType::RejoinRequest,
            7 => MType::Proprietary,
            other => MType::Other(other),
        }
    }
}

/// A parsed `MACPayload{FHDR{DevAddr, FCtrl, FCnt, FOpts}, FPort, FRMPayload}`
/// plus the MIC and the exact byte range the MIC was computed over.
#[derive(Debug, Clone)]
pub struct ParsedDataUp {
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    pub fcnt16: u16,
    pub fopts: Vec<u8>,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
    pub mic: [u8; 4],
    pub mic_input: Vec<u8>,
}

const MIN_DATA_UP_LEN: usize = 1 + 4 + 1 + 2 + 4;

pub fn parse_data_up(phy: &[u8]) -> Result<ParsedDataUp, NsError> {
    if phy.len() < MIN_DATA_UP_LEN {
        return Err(NsError::BadArgument("PHY payload shorter than minimum data-up frame".into()));
    }

    let dev_addr = DevAddr(u32::from_le_bytes(phy[1..5].try_into().unwrap()));
    let fctrl = FCtrl::from_byte(phy[5]);
    let fcnt16 = u16::from_le_bytes(phy[6..8].try_into().unwrap());

    let fopts_start = 8;
    let fopts_len = fctrl.fopts_len as usize;
    if phy.len() < fopts_start + fopts_len + 4 {
        return Err(NsError::BadArgument("FOptsLen exceeds remaining PHY payload".into()));
    }
    let fopts = phy[fopts_start..fopts_start + fopts_len].to_vec();

    let mic_start = phy.len() - 4;
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&phy[mic_start..]);

    let body = &phy[fopts_start + fopts_len..mic_start];
    let (f_port, frm_payload) = if body.is_empty() {
        (None, Vec::new())
    } else {
        (Some(body[0]), body[1..].to_vec())
    };

    Ok(ParsedDataUp { dev_addr, fctrl, fcnt16, fopts, f_port, frm_payload, mic, mic_input: phy[..mic_start].to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_frame_with_no_fopts_no_payload() {
        let phy = vec![0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x05, 0x00, 0xAA, 0xBB, 0xCC, 0xDD];
        let parsed = parse_data_up(&phy).unwrap();
        assert_eq!(parsed.dev_addr, DevAddr(0x0102_0304));
        assert_eq!(parsed.fcnt16, 5);
        assert!(parsed.fopts.is_empty());
        assert_eq!(parsed.f_port, None);
        assert_eq!(parsed.mic, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn parses_frame_with_fport_and_payload() {
        let mut phy = vec![0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x05, 0x00];
        phy.push(10); // FPort
        phy.extend_from_slice(&[0x11, 0x22, 0x33]); // FRMPayload
        phy.extend_from_slice(&[0, 0, 0, 0]); // MIC
        let parsed = parse_data_up(&phy).unwrap();
        assert_eq!(parsed.f_port, Some(10));
        assert_eq!(parsed.frm_payload, vec![0x11, 0x22, 0x33]);
    }
}
