// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::io::{self, Cursor, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::Error,
    frame::*,
    value::{packed_bits_len, pack_bits, unpack_bits},
};

impl From<Request> for Bytes {
    fn from(req: Request) -> Bytes {
        let cnt = request_byte_count(&req);
        let mut data = BytesMut::with_capacity(cnt);
        use crate::frame::Request::*;
        data.put_u8(req.function_code());
        match req {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(coils.len() as u16);
                let packed_coils = pack_bits(&coils);
                data.put_u8(packed_coils.len() as u8);
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                let len = words.len();
                data.put_u16(len as u16);
                data.put_u8((len * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                data.put_u16(read_address);
                data.put_u16(quantity);
                data.put_u16(write_address);
                let n = words.len();
                data.put_u16(n as u16);
                data.put_u8((n * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        data.freeze()
    }
}

impl TryFrom<RequestPdu> for Bytes {
    type Error = Error;

    fn try_from(pdu: RequestPdu) -> Result<Self, Error> {
        match pdu.0 {
            Ok(req) => Ok(req.into()),
            Err(_) => Err(Error::InvalidArgument(
                "an exception response cannot be sent as a request".into(),
            )),
        }
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Bytes {
        let cnt = response_byte_count(&rsp);
        let mut data = BytesMut::with_capacity(cnt);
        use crate::frame::Response::*;
        data.put_u8(rsp.function_code());
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed_coils = pack_bits(&coils);
                data.put_u8(packed_coils.len() as u8);
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            ReadInputRegisters(registers)
            | ReadHoldingRegisters(registers)
            | ReadWriteMultipleRegisters(registers) => {
                data.put_u8((registers.len() * 2) as u8);
                for r in registers {
                    data.put_u16(r);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        data.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function + 0x80);
        data.put_u8(ex.exception as u8);
        data.freeze()
    }
}

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Bytes {
        pdu.0.map_or_else(Into::into, Into::into)
    }
}

/// Decode a request PDU as received by a responder.
///
/// Frames that are structurally complete but carry invalid field values
/// decode into `RequestPdu(Err(_))` so the responder can answer with the
/// proper Modbus exception instead of dropping the frame.
impl TryFrom<Bytes> for RequestPdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Error> {
        decode_request_pdu(&bytes).map_err(|err| Error::Framing(err.to_string()))
    }
}

fn decode_request_pdu(bytes: &Bytes) -> io::Result<RequestPdu> {
    use crate::frame::Request::*;

    let mut rdr = Cursor::new(bytes.as_ref());
    let fn_code = rdr.read_u8()?;
    let invalid_value = || {
        Ok(RequestPdu(Err(ExceptionResponse {
            function: fn_code,
            exception: Exception::IllegalDataValue,
        })))
    };

    let req = match fn_code {
        0x01 | 0x02 => {
            let address = rdr.read_u16::<BigEndian>()?;
            let quantity = rdr.read_u16::<BigEndian>()?;
            if quantity < 1 || quantity > MAX_READ_BITS {
                return invalid_value();
            }
            if fn_code == 0x01 {
                ReadCoils(address, quantity)
            } else {
                ReadDiscreteInputs(address, quantity)
            }
        }
        0x03 | 0x04 => {
            let address = rdr.read_u16::<BigEndian>()?;
            let quantity = rdr.read_u16::<BigEndian>()?;
            if quantity < 1 || quantity > MAX_READ_WORDS {
                return invalid_value();
            }
            if fn_code == 0x03 {
                ReadHoldingRegisters(address, quantity)
            } else {
                ReadInputRegisters(address, quantity)
            }
        }
        0x05 => {
            let address = rdr.read_u16::<BigEndian>()?;
            match rdr.read_u16::<BigEndian>()? {
                0xFF00 => WriteSingleCoil(address, true),
                0x0000 => WriteSingleCoil(address, false),
                _ => return invalid_value(),
            }
        }
        0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
        0x0F => {
            let address = rdr.read_u16::<BigEndian>()?;
            let quantity = rdr.read_u16::<BigEndian>()?;
            let byte_count = rdr.read_u8()?;
            if bytes.len() < 6 + usize::from(byte_count) {
                return Err(io::Error::new(ErrorKind::InvalidData, "Invalid byte count"));
            }
            if quantity < 1
                || quantity > MAX_WRITE_BITS
                || usize::from(byte_count) != packed_bits_len(usize::from(quantity))
            {
                return invalid_value();
            }
            WriteMultipleCoils(address, unpack_bits(&bytes[6..], quantity))
        }
        0x10 => {
            let address = rdr.read_u16::<BigEndian>()?;
            let quantity = rdr.read_u16::<BigEndian>()?;
            let byte_count = rdr.read_u8()?;
            if bytes.len() < 6 + usize::from(byte_count) {
                return Err(io::Error::new(ErrorKind::InvalidData, "Invalid byte count"));
            }
            if quantity < 1
                || quantity > MAX_WRITE_WORDS
                || usize::from(byte_count) != usize::from(quantity) * 2
            {
                return invalid_value();
            }
            let mut data = Vec::with_capacity(usize::from(quantity));
            for _ in 0..quantity {
                data.push(rdr.read_u16::<BigEndian>()?);
            }
            WriteMultipleRegisters(address, data)
        }
        0x17 => {
            let read_address = rdr.read_u16::<BigEndian>()?;
            let read_quantity = rdr.read_u16::<BigEndian>()?;
            let write_address = rdr.read_u16::<BigEndian>()?;
            let write_quantity = rdr.read_u16::<BigEndian>()?;
            let byte_count = rdr.read_u8()?;
            if bytes.len() < 10 + usize::from(byte_count) {
                return Err(io::Error::new(ErrorKind::InvalidData, "Invalid byte count"));
            }
            if read_quantity < 1
                || read_quantity > MAX_READ_WORDS
                || write_quantity < 1
                || write_quantity > MAX_WRITE_WORDS
                || usize::from(byte_count) != usize::from(write_quantity) * 2
            {
                return invalid_value();
            }
            let mut data = Vec::with_capacity(usize::from(write_quantity));
            for _ in 0..write_quantity {
                data.push(rdr.read_u16::<BigEndian>()?);
            }
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data)
        }
        fn_code if fn_code < 0x80 => Custom(fn_code, bytes[1..].into()),
        fn_code => {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("Invalid function code: 0x{fn_code:0>2X}"),
            ));
        }
    };
    Ok(RequestPdu(Ok(req)))
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Error> {
        decode_response(&bytes).map_err(|err| Error::Framing(err.to_string()))
    }
}

fn decode_response(bytes: &Bytes) -> io::Result<Response> {
    use crate::frame::Response::*;

    let mut rdr = Cursor::new(bytes.as_ref());
    let fn_code = rdr.read_u8()?;
    let rsp = match fn_code {
        0x01 | 0x02 => {
            let byte_count = rdr.read_u8()?;
            if bytes.len() < 2 + usize::from(byte_count) {
                return Err(io::Error::new(ErrorKind::InvalidData, "Invalid byte count"));
            }
            // The requested quantity is not known at this point, so all
            // bits of the packed bytes are unpacked. The caller truncates
            // to the quantity it asked for.
            let quantity = u16::from(byte_count) * 8;
            let coils = unpack_bits(&bytes[2..], quantity);
            if fn_code == 0x01 {
                ReadCoils(coils)
            } else {
                ReadDiscreteInputs(coils)
            }
        }
        0x03 | 0x04 | 0x17 => {
            let byte_count = rdr.read_u8()?;
            let quantity = byte_count / 2;
            let mut data = Vec::with_capacity(usize::from(quantity));
            for _ in 0..quantity {
                data.push(rdr.read_u16::<BigEndian>()?);
            }
            match fn_code {
                0x03 => ReadHoldingRegisters(data),
                0x04 => ReadInputRegisters(data),
                _ => ReadWriteMultipleRegisters(data),
            }
        }
        0x05 => {
            let address = rdr.read_u16::<BigEndian>()?;
            match rdr.read_u16::<BigEndian>()? {
                0xFF00 => WriteSingleCoil(address, true),
                0x0000 => WriteSingleCoil(address, false),
                value => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!("Invalid coil value: 0x{value:0>4X}"),
                    ));
                }
            }
        }
        0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
        0x0F => WriteMultipleCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
        0x10 => WriteMultipleRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
        _ => Custom(fn_code, bytes[1..].into()),
    };
    Ok(rsp)
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Error> {
        let mut rdr = Cursor::new(bytes.as_ref());
        let fn_err_code = rdr
            .read_u8()
            .map_err(|err| Error::Framing(err.to_string()))?;
        if fn_err_code < 0x80 {
            return Err(Error::Framing("Invalid exception function code".into()));
        }
        let function = fn_err_code - 0x80;
        let code = rdr
            .read_u8()
            .map_err(|err| Error::Framing(err.to_string()))?;
        let exception = Exception::try_from(code)?;
        Ok(ExceptionResponse {
            function,
            exception,
        })
    }
}

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        use crate::frame::Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => {
                return Err(Error::Framing(format!("Invalid exception code: {code}")));
            }
        };
        Ok(ex)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Error> {
        let fn_code = *bytes
            .first()
            .ok_or_else(|| Error::Framing("empty response PDU".into()))?;
        let pdu = if fn_code < 0x80 {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn request_byte_count(req: &Request) -> usize {
    use crate::frame::Request::*;
    match *req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, ref coils) => 6 + packed_bits_len(coils.len()),
        WriteMultipleRegisters(_, ref data) => 6 + data.len() * 2,
        ReadWriteMultipleRegisters(_, _, _, ref data) => 10 + data.len() * 2,
        Custom(_, ref data) => 1 + data.len(),
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    use crate::frame::Response::*;
    match *rsp {
        ReadCoils(ref coils) | ReadDiscreteInputs(ref coils) => 2 + packed_bits_len(coils.len()),
        WriteSingleCoil(_, _)
        | WriteMultipleCoils(_, _)
        | WriteMultipleRegisters(_, _)
        | WriteSingleRegister(_, _) => 5,
        ReadInputRegisters(ref data)
        | ReadHoldingRegisters(ref data)
        | ReadWriteMultipleRegisters(ref data) => 2 + data.len() * 2,
        Custom(_, ref data) => 1 + data.len(),
    }
}
