// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::{error, fmt};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// Protocol limits for the quantity field, taken from the Modbus
/// application protocol specification.
pub(crate) const MAX_READ_BITS: Quantity = 0x07D0;
pub(crate) const MAX_READ_WORDS: Quantity = 0x007D;
pub(crate) const MAX_WRITE_BITS: Quantity = 0x07B0;
pub(crate) const MAX_WRITE_WORDS: Quantity = 0x007B;

/// A request represents a message from the client (initiator) to the
/// server (responder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    /// A raw PDU for vendor-specific function codes.
    Custom(FunctionCode, Vec<u8>),
}

impl Request {
    /// The function code of the request.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;
        match *self {
            ReadCoils(_, _) => 0x01,
            ReadDiscreteInputs(_, _) => 0x02,
            ReadHoldingRegisters(_, _) => 0x03,
            ReadInputRegisters(_, _) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadWriteMultipleRegisters(_, _, _, _) => 0x17,
            Custom(code, _) => code,
        }
    }
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: The length of the result `Vec` is always
/// a multiple of 8. Only the values of the first bits/coils that have actually
/// been requested are defined. The value of the remaining bits depend on the
/// server implementation and those coils should be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Vec<Word>),
    Custom(FunctionCode, Vec<u8>),
}

impl Response {
    /// The function code of the response.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;
        match *self {
            ReadCoils(_) => 0x01,
            ReadDiscreteInputs(_) => 0x02,
            ReadHoldingRegisters(_) => 0x03,
            ReadInputRegisters(_) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadWriteMultipleRegisters(_) => 0x17,
            Custom(code, _) => code,
        }
    }
}

/// A server (responder) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDevice = 0x0B,
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        use Exception::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

/// A server (responder) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

/// Represents a decoded request message.
///
/// On the responder side the payload is a `Result`: a frame that is
/// structurally complete but carries invalid field values (quantity out of
/// range, inconsistent byte count, a single-coil value other than `0x0000`
/// or `0xFF00`) decodes into the exception response that answers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Result<Request, ExceptionResponse>);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(Ok(from))
    }
}

impl From<ExceptionResponse> for RequestPdu {
    fn from(from: ExceptionResponse) -> Self {
        RequestPdu(Err(from))
    }
}

/// Represents a message from the server (responder) to the client (initiator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<Result<Response, ExceptionResponse>> for ResponsePdu {
    fn from(from: Result<Response, ExceptionResponse>) -> Self {
        ResponsePdu(from)
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}
