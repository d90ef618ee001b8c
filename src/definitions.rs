// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register definitions loaded from configuration
//!
//! The input format groups registers by bank under their symbolic names:
//!
//! ```json
//! {
//!     "COILS": {
//!         "RESET": { "register": 123, "len": 1, "val": true }
//!     },
//!     "HREGS": {
//!         "SETPOINTS": { "register": 93, "len": 3, "val": [19, 20, 21] }
//!     },
//!     "CONNECTION": {
//!         "type": "tcp", "unit": 10, "address": "192.168.178.80",
//!         "mode": "slave"
//!     }
//! }
//! ```
//!
//! Symbolic names are a configuration concern; only addresses and values
//! are carried into the [`RegisterStore`].

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    frame::{Address, Quantity},
    serial::{Parity, SerialParams},
    store::RegisterStore,
};

/// A named register block within one bank.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegisterDef {
    /// Base address of the block.
    pub register: Address,
    /// Number of consecutive addresses the block covers.
    #[serde(default = "default_len")]
    pub len: Quantity,
    /// Initial value(s).
    pub val: RegisterValue,
}

const fn default_len() -> Quantity {
    1
}

/// The value of a register definition: a single bit or word, or a run
/// of them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Bit(bool),
    Bits(Vec<bool>),
    Word(u16),
    Words(Vec<u16>),
}

impl RegisterValue {
    /// Resolve to bit values, replicating a scalar to `len` elements.
    fn to_bits(&self, len: Quantity) -> Result<Vec<bool>> {
        let values = match self {
            Self::Bit(bit) => vec![*bit; usize::from(len)],
            Self::Word(word) => vec![*word != 0; usize::from(len)],
            Self::Bits(bits) => bits.clone(),
            Self::Words(words) => words.iter().map(|w| *w != 0).collect(),
        };
        check_len(values.len(), len)?;
        Ok(values)
    }

    /// Resolve to word values, replicating a scalar to `len` elements.
    fn to_words(&self, len: Quantity) -> Result<Vec<u16>> {
        let values = match self {
            Self::Bit(bit) => vec![u16::from(*bit); usize::from(len)],
            Self::Word(word) => vec![*word; usize::from(len)],
            Self::Bits(bits) => bits.iter().map(|b| u16::from(*b)).collect(),
            Self::Words(words) => words.clone(),
        };
        check_len(values.len(), len)?;
        Ok(values)
    }
}

fn check_len(actual: usize, expected: Quantity) -> Result<()> {
    if actual != usize::from(expected) {
        return Err(Error::InvalidArgument(
            "register definition value does not match its length".into(),
        ));
    }
    Ok(())
}

/// Transport selection of a [`ConnectionSettings`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Rtu,
    Tcp,
}

/// Role selection of a [`ConnectionSettings`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Master,
    Slave,
}

/// Optional connection block of a register definition file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    /// Unit address (RTU) or TCP port, matching the source format.
    pub unit: u16,
    /// Serial device path or host address.
    pub address: String,
    pub mode: ConnectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,
}

impl ConnectionSettings {
    /// Serial line parameters of an RTU connection.
    ///
    /// `None` for TCP connections. Data bits, stop bits and parity fall
    /// back to 8N1 when unspecified.
    #[must_use]
    pub fn serial_params(&self) -> Option<SerialParams> {
        if self.kind != ConnectionKind::Rtu {
            return None;
        }
        Some(SerialParams {
            baud_rate: self.baudrate?,
            data_bits: self.data_bits.unwrap_or(8),
            stop_bits: self.stop_bits.unwrap_or(1),
            parity: self.parity.unwrap_or_default(),
        })
    }
}

/// Register definitions for all four banks plus the optional connection
/// block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RegisterDefinitions {
    #[serde(rename = "COILS", default)]
    pub coils: BTreeMap<String, RegisterDef>,
    #[serde(rename = "ISTS", default)]
    pub discrete_inputs: BTreeMap<String, RegisterDef>,
    #[serde(rename = "HREGS", default)]
    pub holding_registers: BTreeMap<String, RegisterDef>,
    #[serde(rename = "IREGS", default)]
    pub input_registers: BTreeMap<String, RegisterDef>,
    #[serde(
        rename = "CONNECTION",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection: Option<ConnectionSettings>,
}

impl RegisterDefinitions {
    /// Parse definitions from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let defs: Self = serde_json::from_str(json)
            .map_err(|err| Error::InvalidArgument(format!("invalid register definitions: {err}")))?;
        defs.validate()?;
        Ok(defs)
    }

    /// Parse definitions from a JSON reader, e.g. a file.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let defs: Self = serde_json::from_reader(reader)
            .map_err(|err| Error::InvalidArgument(format!("invalid register definitions: {err}")))?;
        defs.validate()?;
        Ok(defs)
    }

    fn validate(&self) -> Result<()> {
        if let Some(connection) = &self.connection {
            if connection.kind == ConnectionKind::Rtu && connection.baudrate.is_none() {
                return Err(Error::InvalidArgument(
                    "RTU connection settings require a baudrate".into(),
                ));
            }
        }
        Ok(())
    }

    /// Populate a register store with the defined values.
    ///
    /// Existing entries at the same base addresses are replaced.
    pub fn apply_to(&self, store: &mut RegisterStore) -> Result<()> {
        for def in self.coils.values() {
            store.coils_mut().set(def.register, def.val.to_bits(def.len)?);
        }
        for def in self.discrete_inputs.values() {
            store
                .discrete_inputs_mut()
                .set(def.register, def.val.to_bits(def.len)?);
        }
        for def in self.holding_registers.values() {
            store
                .holding_registers_mut()
                .set(def.register, def.val.to_words(def.len)?);
        }
        for def in self.input_registers.values() {
            store
                .input_registers_mut()
                .set(def.register, def.val.to_words(def.len)?);
        }
        Ok(())
    }
}
