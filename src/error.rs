// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use thiserror::Error;

use crate::frame::ExceptionResponse;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
///
/// The codec layers never perform I/O and only produce [`Error::Framing`];
/// semantically invalid user input is rejected with [`Error::InvalidArgument`]
/// before anything is written to the wire. The remaining variants originate
/// in the transports and the initiator facade.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input detected at the API boundary, before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The responder answered with a Modbus exception.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// No (or only a partial) response arrived within the deadline.
    #[error("request timed out")]
    Timeout,

    /// A received frame could not be decoded: CRC mismatch, invalid
    /// protocol identifier or length field, or a truncated frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// The response does not belong to the pending request: transaction
    /// id, unit address, or function code disagree.
    #[error("response mismatch: {0}")]
    Correlation(String),

    /// The response echo fields (address, quantity, value) do not match
    /// the request parameters.
    #[error("response validation failed: {0}")]
    Validation(String),

    /// Failure of the underlying socket or serial port.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for std::io::Error {
    fn from(from: Error) -> Self {
        match from {
            Error::Io(err) => err,
            Error::Timeout => std::io::Error::new(std::io::ErrorKind::TimedOut, from.to_string()),
            err => std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
        }
    }
}
