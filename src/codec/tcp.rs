// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::Error, frame::tcp::*};

use super::*;

const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduDecoder;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        // `length` counts the unit id byte plus the PDU
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len == 0 {
            return Err(Error::Framing(format!("Invalid data length: {len}")));
        }
        let pdu_len = len - 1;
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::Framing(format!(
                "Invalid protocol identifier: expected = {PROTOCOL_ID}, actual = {protocol_id}"
            )));
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        let header = Header {
            transaction_id,
            unit_id,
        };

        let pdu_data = buf.split_to(pdu_len).freeze();

        Ok(Some((header, pdu_data)))
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>, Error> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let pdu = RequestPdu::try_from(pdu_data)?;
        Ok(Some(RequestAdu { hdr, pdu }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16((pdu_data.len() + 1) as u16);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16((pdu_data.len() + 1) as u16);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSACTION_ID: TransactionId = 0x1001;
    const TRANSACTION_ID_HI: u8 = 0x10;
    const TRANSACTION_ID_LO: u8 = 0x01;

    const UNIT_ID: u8 = 0xFE;

    mod client {
        use super::*;

        #[test]
        fn decode_header_fragment() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 6);
        }

        #[test]
        fn decode_partly_received_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x00, // protocol id HI
                    0x00, // protocol id LO
                    0x00, // length HI
                    0x03, // length LO
                    UNIT_ID,
                    0x02, // function code
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 8);
        }

        #[test]
        fn decode_exception_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x00,
                    0x00,
                    0x00, // length HI
                    0x03, // length LO
                    UNIT_ID,
                    0x82, // exception = 0x80 + 0x02
                    0x03, //
                    0x00, //
                ][..],
            );

            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, TRANSACTION_ID);
            assert_eq!(hdr.unit_id, UNIT_ID);
            if let ResponsePdu(Err(err)) = pdu {
                assert_eq!(format!("{err}"), "Modbus function 2: Illegal data value");
                assert_eq!(buf.len(), 1);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn decode_with_invalid_protocol_id() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x33, // protocol id HI
                    0x12, // protocol id LO
                    0x00, // length HI
                    0x03, // length LO
                    UNIT_ID,
                    0x82,
                    0x03,
                ][..],
            );
            let err = codec.decode(&mut buf).err().unwrap();
            assert!(matches!(err, Error::Framing(_)));
            assert!(format!("{err}").contains("Invalid protocol identifier"));
        }

        #[test]
        fn decode_with_zero_length() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x00,
                    0x00,
                    0x00, // length HI
                    0x00, // length LO
                    UNIT_ID,
                ][..],
            );
            let err = codec.decode(&mut buf).err().unwrap();
            assert!(matches!(err, Error::Framing(_)));
        }

        #[test]
        fn encode_read_request() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let req = Request::ReadInputRegisters(0x23, 5);
            let adu = RequestAdu {
                hdr: Header {
                    transaction_id: TRANSACTION_ID,
                    unit_id: UNIT_ID,
                },
                pdu: req.clone().into(),
            };
            codec.encode(adu, &mut buf).unwrap();
            // header
            assert_eq!(
                &buf[0..7],
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x00,
                    0x00,
                    0x00,
                    0x06,
                    UNIT_ID
                ]
            );
            let pdu: Bytes = req.into();
            assert_eq!(&buf[7..], &pdu[..]);
        }
    }

    mod server {
        use super::*;

        #[test]
        fn decode_read_coils_request() {
            let mut codec = ServerCodec::default();
            // scenario: trans id 1, unit 10, read_coils(123, 1)
            let mut buf = BytesMut::from(
                &[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x01, 0x00, 0x7B, 0x00, 0x01,
                ][..],
            );
            let RequestAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, 1);
            assert_eq!(hdr.unit_id, 10);
            assert_eq!(pdu.0, Ok(Request::ReadCoils(123, 1)));
        }

        #[test]
        fn encode_read_coils_response() {
            let mut codec = ServerCodec::default();
            let mut buf = BytesMut::new();
            let adu = ResponseAdu {
                hdr: Header {
                    transaction_id: 1,
                    unit_id: 10,
                },
                pdu: Response::ReadCoils(vec![true]).into(),
            };
            codec.encode(adu, &mut buf).unwrap();
            assert_eq!(
                &buf[..],
                &[0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x0A, 0x01, 0x01, 0x01]
            );
        }

        #[test]
        fn decode_malformed_quantity_as_exception() {
            let mut codec = ServerCodec::default();
            // read_coils with quantity 0
            let mut buf = BytesMut::from(
                &[
                    0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x01, 0x00, 0x7B, 0x00, 0x00,
                ][..],
            );
            let RequestAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, 7);
            assert_eq!(
                pdu.0,
                Err(ExceptionResponse {
                    function: 0x01,
                    exception: Exception::IllegalDataValue,
                })
            );
        }
    }
}
