//! E1.31 (sACN) packet parsing, fixed byte offsets per the ANSI E1.31 root
//! layer / framing layer / DMP layer.

use crate::error::SacnParseError;
use crate::model::UniverseId;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub struct SacnPacket {
    pub cid: [u8; 16],
    pub universe: UniverseId,
    pub priority: u8,
    pub sequence: u8,
    pub dmx: Vec<u8>, // length P-1, caller pads to 512
}

const ROOT_VECTOR_DATA: u32 = 0x0000_0004;
const FRAMING_VECTOR_DATA: u32 = 0x0000_0002;
const DMP_VECTOR: u8 = 0x02;
const START_CODE_DMX: u8 = 0x00;
const PACKET_IDENTIFIER: &[u8; 12] = b"ASC-E1.17\0\0\0";

pub fn parse_packet(datagram: &[u8]) -> Result<SacnPacket, SacnParseError> {
    if datagram.len() < 126 {
        return Err(SacnParseError::TooShort(datagram.len()));
    }
    let mut cur = Cursor::new(datagram);

    let preamble = cur.read_u16::<BigEndian>().unwrap();
    let postamble = cur.read_u16::<BigEndian>().unwrap();
    if preamble != 0x0010 || postamble != 0x0000 {
        return Err(SacnParseError::BadPreamble);
    }

    let mut identifier = [0u8; 12];
    cur.read_exact(&mut identifier).unwrap();
    if &identifier != PACKET_IDENTIFIER {
        return Err(SacnParseError::BadIdentifier);
    }

    let _root_flags_len = cur.read_u16::<BigEndian>().unwrap();
    let root_vector = cur.read_u32::<BigEndian>().unwrap();
    if root_vector != ROOT_VECTOR_DATA {
        return Err(SacnParseError::BadRootVector(root_vector));
    }

    let mut cid = [0u8; 16];
    cur.read_exact(&mut cid).unwrap();

    let _framing_flags_len = cur.read_u16::<BigEndian>().unwrap();
    let framing_vector = cur.read_u32::<BigEndian>().unwrap();
    if framing_vector != FRAMING_VECTOR_DATA {
        return Err(SacnParseError::BadFramingVector(framing_vector));
    }

    let mut source_name = [0u8; 64];
    cur.read_exact(&mut source_name).unwrap();
    let _ = source_name; // diagnostics only, not surfaced on SacnPacket

    let priority = cur.read_u8().unwrap();
    let _sync_address = cur.read_u16::<BigEndian>().unwrap();
    let sequence = cur.read_u8().unwrap();
    let _options = cur.read_u8().unwrap();
    let universe = cur.read_u16::<BigEndian>().unwrap();

    let _dmp_flags_len = cur.read_u16::<BigEndian>().unwrap();
    let dmp_vector = cur.read_u8().unwrap();
    if dmp_vector != DMP_VECTOR {
        return Err(SacnParseError::BadDmpVector(dmp_vector));
    }
    let _address_type = cur.read_u8().unwrap();
    let _first_property_address = cur.read_u16::<BigEndian>().unwrap();
    let _address_increment = cur.read_u16::<BigEndian>().unwrap();
    let property_count = cur.read_u16::<BigEndian>().unwrap();
    if !(1..=513).contains(&property_count) {
        return Err(SacnParseError::BadPropertyCount(property_count));
    }

    let start_code = cur.read_u8().unwrap();
    if start_code != START_CODE_DMX {
        return Err(SacnParseError::BadStartCode(start_code));
    }

    let slot_len = (property_count - 1) as usize;
    let pos = cur.position() as usize;
    let available = datagram.len().saturating_sub(pos);
    let take = slot_len.min(available);
    let dmx = datagram[pos..pos + take].to_vec();

    Ok(SacnPacket {
        cid,
        universe: universe as UniverseId,
        priority: priority.min(200),
        sequence,
        dmx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Vec<u8> {
        let mut pkt = vec![0u8; 126 + 3];
        pkt[0..2].copy_from_slice(&0x0010u16.to_be_bytes());
        pkt[2..4].copy_from_slice(&0x0000u16.to_be_bytes());
        pkt[4..16].copy_from_slice(PACKET_IDENTIFIER);
        pkt[18..22].copy_from_slice(&ROOT_VECTOR_DATA.to_be_bytes());
        pkt[22..38].copy_from_slice(&[9u8; 16]);
        pkt[40..44].copy_from_slice(&FRAMING_VECTOR_DATA.to_be_bytes());
        pkt[108] = 150;
        pkt[111] = 42;
        pkt[113..115].copy_from_slice(&7u16.to_be_bytes());
        pkt[117] = DMP_VECTOR;
        pkt[123..125].copy_from_slice(&4u16.to_be_bytes());
        pkt[125] = 0x00;
        pkt[126] = 11;
        pkt[127] = 22;
        pkt[128] = 33;
        pkt
    }

    #[test]
    fn parses_a_well_formed_packet() {
        let pkt = parse_packet(&sample_packet()).unwrap();
        assert_eq!(pkt.universe, 7);
        assert_eq!(pkt.priority, 150);
        assert_eq!(pkt.sequence, 42);
        assert_eq!(pkt.dmx, vec![11, 22, 33]);
    }

    #[test]
    fn rejects_bad_preamble() {
        let mut pkt = sample_packet();
        pkt[0] = 0xff;
        assert!(matches!(parse_packet(&pkt), Err(SacnParseError::BadPreamble)));
    }

    #[test]
    fn rejects_non_dmx_start_code() {
        let mut pkt = sample_packet();
        pkt[125] = 0x01;
        assert!(matches!(parse_packet(&pkt), Err(SacnParseError::BadStartCode(_))));
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(parse_packet(&[0u8; 10]), Err(SacnParseError::TooShort(10))));
    }
}
