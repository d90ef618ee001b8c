// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::Error, frame::rtu::*, unit::UnitId};

use super::*;

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

type DroppedBytes = SmallVec<[u8; MAX_FRAME_LEN]>;

/// Pre-computed CRC-16 lookup table for the reflected polynomial 0xA001.
///
/// Entry `i` is `i` folded through 8 shift/xor rounds. The table starts
/// `[0x0000, 0xC0C1, 0xC181, 0x0140, ...]`.
static CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            let lsb_set = crc & 0x0001 != 0;
            crc >>= 1;
            if lsb_set {
                crc ^= 0xA001;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-16 over the frame bytes, initialized with 0xFFFF.
///
/// The result is byte-swapped so that writing it big-endian puts the low
/// byte first on the wire, as the serial line specification requires.
fn calc_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for x in data {
        let idx = (crc ^ u16::from(*x)) & 0xFF;
        crc = (crc >> 8) ^ CRC16_TABLE[idx as usize];
    }
    crc << 8 | crc >> 8
}

fn check_crc(adu_data: &[u8], expected_crc: u16) -> Result<(), Error> {
    let actual_crc = calc_crc(adu_data);
    if expected_crc != actual_crc {
        return Err(Error::Framing(format!(
            "Invalid CRC: expected = 0x{expected_crc:0>4X}, actual = 0x{actual_crc:0>4X}"
        )));
    }
    Ok(())
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct FrameDecoder {
    dropped_bytes: DroppedBytes,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            dropped_bytes: DroppedBytes::new(),
        }
    }
}

impl FrameDecoder {
    pub(crate) fn decode(
        &mut self,
        buf: &mut BytesMut,
        pdu_len: usize,
    ) -> Result<Option<(UnitId, Bytes)>, Error> {
        const CRC_BYTE_COUNT: usize = 2;

        let adu_len = 1 + pdu_len;

        if buf.len() < adu_len + CRC_BYTE_COUNT {
            // Incomplete frame
            return Ok(None);
        }

        let mut adu_buf = buf.split_to(adu_len);
        let crc_buf = buf.split_to(CRC_BYTE_COUNT);

        // Read trailing CRC and verify ADU
        let expected_crc = BigEndian::read_u16(&crc_buf);
        if let Err(err) = check_crc(&adu_buf, expected_crc) {
            // CRC is invalid - restore the input buffer
            let rem_buf = buf.split();
            debug_assert!(buf.is_empty());
            buf.unsplit(adu_buf);
            buf.unsplit(crc_buf);
            buf.unsplit(rem_buf);

            return Err(err);
        }

        if !self.dropped_bytes.is_empty() {
            log::warn!(
                "Successfully decoded frame after dropping {} byte(s): {:X?}",
                self.dropped_bytes.len(),
                self.dropped_bytes
            );
            self.dropped_bytes.clear();
        }
        let unit_id = adu_buf.split_to(1)[0];
        let pdu_data = adu_buf.freeze();

        Ok(Some((unit_id, pdu_data)))
    }

    pub(crate) fn recover_on_error(&mut self, buf: &mut BytesMut) {
        // If decoding failed the buffer cannot be empty
        debug_assert!(!buf.is_empty());
        // Skip and record the first byte of the buffer
        {
            let first = buf.first().unwrap();
            log::debug!("Dropped first byte: {first:X?}");
            if self.dropped_bytes.len() >= MAX_FRAME_LEN {
                log::error!(
                    "Giving up to decode frame after dropping {} byte(s): {:X?}",
                    self.dropped_bytes.len(),
                    self.dropped_bytes
                );
                self.dropped_bytes.clear();
            }
            self.dropped_bytes.push(*first);
        }
        buf.advance(1);
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct RequestDecoder {
    frame_decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ResponseDecoder {
    frame_decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    decoder: ResponseDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    decoder: RequestDecoder,
}

fn get_request_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>, Error> {
    let Some(fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x06 => 5,
        0x0F | 0x10 => {
            return Ok(adu_buf
                .get(6)
                .map(|&byte_count| 6 + usize::from(byte_count)));
        }
        0x17 => {
            return Ok(adu_buf
                .get(10)
                .map(|&byte_count| 10 + usize::from(byte_count)));
        }
        _ => {
            return Err(Error::Framing(format!(
                "Invalid function code: 0x{fn_code:0>2X}"
            )));
        }
    };
    Ok(Some(len))
}

fn get_response_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>, Error> {
    let Some(fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x04 | 0x17 => {
            return Ok(adu_buf
                .get(2)
                .map(|&byte_count| 2 + usize::from(byte_count)));
        }
        0x05 | 0x06 | 0x0F | 0x10 => 5,
        0x81..=0xAB => 2,
        _ => {
            return Err(Error::Framing(format!(
                "Invalid function code: 0x{fn_code:0>2X}"
            )));
        }
    };
    Ok(Some(len))
}

impl Decoder for RequestDecoder {
    type Item = (UnitId, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        decode("request", &mut self.frame_decoder, get_request_pdu_len, buf)
    }
}

impl Decoder for ResponseDecoder {
    type Item = (UnitId, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        decode(
            "response",
            &mut self.frame_decoder,
            get_response_pdu_len,
            buf,
        )
    }
}

fn decode<F>(
    pdu_type: &str,
    frame_decoder: &mut FrameDecoder,
    get_pdu_len: F,
    buf: &mut BytesMut,
) -> Result<Option<(UnitId, Bytes)>, Error>
where
    F: Fn(&BytesMut) -> Result<Option<usize>, Error>,
{
    const MAX_RETRIES: usize = 20;

    for _ in 0..MAX_RETRIES {
        let result = get_pdu_len(buf).and_then(|pdu_len| {
            let Some(pdu_len) = pdu_len else {
                // Incomplete frame
                return Ok(None);
            };

            frame_decoder.decode(buf, pdu_len)
        });

        if let Err(err) = result {
            log::warn!("Failed to decode {pdu_type} frame: {err}");
            frame_decoder.recover_on_error(buf);
            continue;
        }

        return result;
    }

    // Maximum number of retries exceeded.
    log::error!("Giving up to decode frame after {MAX_RETRIES} retries");
    Err(Error::Framing("Too many decode retries".into()))
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((unit_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { unit_id };

        // Decoding of the PDU is unlikely to fail due to transmission
        // errors, because the frame's bytes have already been verified
        // with the CRC.
        ResponsePdu::try_from(pdu_data)
            .map(|pdu| Some(ResponseAdu { hdr, pdu }))
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode response PDU: {err}");
                err
            })
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>, Error> {
        let Some((unit_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { unit_id };

        // Decoding of the PDU is unlikely to fail due to transmission
        // errors, because the frame's bytes have already been verified
        // with the CRC.
        RequestPdu::try_from(pdu_data)
            .map(|pdu| Some(RequestAdu { hdr, pdu }))
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode request PDU: {err}");
                err
            })
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        buf.reserve(pdu_data.len() + 3);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len() + 3);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_table_anchor() {
        assert_eq!(CRC16_TABLE.len(), 256);
        assert_eq!(&CRC16_TABLE[0..4], &[0x0000, 0xC0C1, 0xC181, 0x0140]);
    }

    #[test]
    fn crc_of_reference_frames() {
        let msg = [0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        assert_eq!(calc_crc(&msg), 0xB663);

        let msg = [0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00];
        assert_eq!(calc_crc(&msg), 0xFBF9);
    }

    #[test]
    fn crc_appended_low_byte_first() {
        // 01 04 02 FF FF must be followed by B8 80 on the wire
        let msg = [0x01, 0x04, 0x02, 0xFF, 0xFF];
        let crc = calc_crc(&msg);
        assert_eq!(crc.to_be_bytes(), [0xB8, 0x80]);
    }

    #[test]
    fn request_pdu_len() {
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&[0x66, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(get_request_pdu_len(&buf).is_err());

        for fn_code in 0x01..=0x06 {
            buf[1] = fn_code;
            assert_eq!(get_request_pdu_len(&buf).unwrap(), Some(5));
        }

        buf[1] = 0x0F;
        buf[6] = 99;
        assert_eq!(get_request_pdu_len(&buf).unwrap(), Some(105));

        buf[1] = 0x10;
        buf[6] = 99;
        assert_eq!(get_request_pdu_len(&buf).unwrap(), Some(105));

        buf[1] = 0x17;
        buf[10] = 4; // write byte count
        assert_eq!(get_request_pdu_len(&buf).unwrap(), Some(14));
    }

    #[test]
    fn response_pdu_len() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x66, 0x01, 99, 0x00]);
        assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(101));

        buf[1] = 0x00;
        assert!(get_response_pdu_len(&buf).is_err());

        for fn_code in [0x05, 0x06, 0x0F, 0x10] {
            buf[1] = fn_code;
            assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(5));
        }

        for fn_code in 0x81..0xAB {
            buf[1] = fn_code;
            assert_eq!(get_response_pdu_len(&buf).unwrap(), Some(2));
        }
    }

    mod client {
        use super::*;

        #[test]
        fn decode_partly_received_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x12, // unit address
                    0x02, // function code
                    0x03, // byte count
                    0x00, // data
                    0x00, // data
                    0x00, // data
                    0x00, // CRC first byte
                          // missing CRC second byte
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 7);
        }

        #[test]
        fn decode_empty_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 0);
        }

        #[test]
        fn decode_single_byte_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(&[0x00][..]);
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 1);
        }

        #[test]
        fn decode_read_holding_registers_response() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x01, // unit address
                    0x03, // function code
                    0x04, // byte count
                    0x89, //
                    0x02, //
                    0x42, //
                    0xC7, //
                    0x00, // crc
                    0x9D, // crc
                    0x00,
                ][..],
            );
            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(buf.len(), 1);
            assert_eq!(hdr.unit_id, 0x01);
            if let ResponsePdu(Ok(Response::ReadHoldingRegisters(data))) = pdu {
                assert_eq!(data, vec![0x8902, 0x42C7]);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn decode_response_after_dropping_invalid_bytes() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x42, // garbage
                    0x43, // garbage
                    0x01, // unit address
                    0x03, // function code
                    0x04, // byte count
                    0x89, //
                    0x02, //
                    0x42, //
                    0xC7, //
                    0x00, // crc
                    0x9D, // crc
                ][..],
            );
            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.unit_id, 0x01);
            if let ResponsePdu(Ok(Response::ReadHoldingRegisters(data))) = pdu {
                assert_eq!(data, vec![0x8902, 0x42C7]);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn decode_exception_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x66, //
                    0x82, // exception = 0x80 + 0x02
                    0x03, //
                    0xB1, // crc
                    0x7E, // crc
                ][..],
            );

            let ResponseAdu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            if let ResponsePdu(Err(err)) = pdu {
                assert_eq!(format!("{err}"), "Modbus function 2: Illegal data value");
                assert_eq!(buf.len(), 0);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn encode_read_request() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let req = Request::ReadHoldingRegisters(0x082B, 2);
            let adu = RequestAdu {
                hdr: Header { unit_id: 0x01 },
                pdu: req.into(),
            };
            codec.encode(adu, &mut buf).unwrap();

            assert_eq!(
                buf,
                Bytes::from_static(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63])
            );
        }
    }

    mod server {
        use super::*;

        #[test]
        fn decode_partly_received_write_request() {
            for fn_code in [0x0F, 0x10] {
                let mut codec = ServerCodec::default();
                let mut buf = BytesMut::from(&[0x12, fn_code][..]);
                let res = codec.decode(&mut buf).unwrap();
                assert!(res.is_none());
                assert_eq!(buf.len(), 2);
            }
        }

        #[test]
        fn decode_read_coils_request() {
            let mut codec = ServerCodec::default();
            // 0A 01 00 7B 00 01 + CRC
            let mut adu = vec![0x0A, 0x01, 0x00, 0x7B, 0x00, 0x01];
            let crc = calc_crc(&adu);
            adu.extend_from_slice(&crc.to_be_bytes());
            let mut buf = BytesMut::from(&adu[..]);

            let RequestAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.unit_id, 0x0A);
            assert_eq!(pdu.0, Ok(Request::ReadCoils(0x7B, 1)));
        }

        #[test]
        fn decode_request_with_corrupt_crc_resyncs() {
            let mut codec = ServerCodec::default();
            let mut adu = vec![0x0A, 0x01, 0x00, 0x7B, 0x00, 0x01];
            let crc = calc_crc(&adu);
            adu.extend_from_slice(&[0xDE, 0xAD]); // wrong CRC
            let good = {
                let mut good = vec![0x0A, 0x01, 0x00, 0x7B, 0x00, 0x01];
                good.extend_from_slice(&crc.to_be_bytes());
                good
            };
            adu.extend_from_slice(&good);
            let mut buf = BytesMut::from(&adu[..]);

            // The corrupt frame is skipped byte-by-byte until the good one decodes.
            let RequestAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.unit_id, 0x0A);
            assert_eq!(pdu.0, Ok(Request::ReadCoils(0x7B, 1)));
        }

        #[test]
        fn encode_exception_response() {
            let mut codec = ServerCodec::default();
            let mut buf = BytesMut::new();
            let adu = ResponseAdu {
                hdr: Header { unit_id: 0x0A },
                pdu: ResponsePdu(Err(ExceptionResponse {
                    function: 0x04,
                    exception: Exception::IllegalDataAddress,
                })),
            };
            codec.encode(adu, &mut buf).unwrap();
            assert_eq!(&buf[0..3], &[0x0A, 0x84, 0x02]);
            // trailing CRC
            assert_eq!(buf.len(), 5);
        }
    }
}
