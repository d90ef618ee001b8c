// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed register banks and the request dispatcher
//!
//! A responder owns four banks: coils and discrete inputs hold single bits,
//! holding and input registers hold 16 bit words. A bank entry is either a
//! single value or an ordered run of values; a run based at address `A`
//! with length `n` covers the addresses `A..A+n-1` and block reads flatten
//! it into its elements.
//!
//! Every write applied through the dispatcher is recorded in a change
//! journal so that a bridging layer can learn what remote initiators
//! changed since it last looked.

#[cfg(feature = "server")]
mod service;

#[cfg(feature = "server")]
pub use self::service::RegisterService;

use std::collections::BTreeMap;
use std::fmt;

use crate::frame::*;

/// Callback invoked after a slot has been written through the dispatcher.
///
/// The callback must not block. A returned error is logged and does not
/// affect the wire response; the write has already been acknowledged by
/// the time the callback runs.
pub type WriteHook<T> =
    Box<dyn Fn(Address, &[T]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// A single register bank: a mapping from 16 bit addresses to values.
pub struct Bank<T> {
    slots: BTreeMap<Address, Vec<T>>,
    hooks: BTreeMap<Address, WriteHook<T>>,
}

impl<T: fmt::Debug> fmt::Debug for Bank<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bank")
            .field("slots", &self.slots)
            .field("hooks", &self.hooks.keys())
            .finish()
    }
}

impl<T> Default for Bank<T> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            hooks: BTreeMap::new(),
        }
    }
}

impl<T: Copy> Bank<T> {
    /// Establish an entry at the given base address.
    ///
    /// Idempotent: an entry that already exists is left untouched.
    /// Empty value runs are ignored.
    pub fn add(&mut self, addr: Address, values: impl IntoIterator<Item = T>) {
        let values: Vec<T> = values.into_iter().collect();
        if values.is_empty() {
            return;
        }
        self.slots.entry(addr).or_insert(values);
    }

    /// Replace (or create) the entry at the given base address.
    ///
    /// Empty value runs are ignored.
    pub fn set(&mut self, addr: Address, values: impl IntoIterator<Item = T>) {
        let values: Vec<T> = values.into_iter().collect();
        if values.is_empty() {
            return;
        }
        self.slots.insert(addr, values);
    }

    /// The values of the entry based at the given address.
    #[must_use]
    pub fn get(&self, addr: Address) -> Option<&[T]> {
        self.slots.get(&addr).map(Vec::as_slice)
    }

    /// Remove the entry based at the given address and return its
    /// previous values.
    pub fn remove(&mut self, addr: Address) -> Option<Vec<T>> {
        self.hooks.remove(&addr);
        self.slots.remove(&addr)
    }

    /// Iterate over all base addresses in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = Address> + '_ {
        self.slots.keys().copied()
    }

    /// Attach a callback to the slot based at the given address.
    ///
    /// The callback fires after each write applied through the dispatcher
    /// to any address the slot covers.
    pub fn on_write(&mut self, addr: Address, hook: WriteHook<T>) {
        self.hooks.insert(addr, hook);
    }

    /// Locate the slot covering the given address.
    fn resolve(&self, addr: Address) -> Option<(Address, usize)> {
        self.slots.range(..=addr).next_back().and_then(|(base, values)| {
            let offset = usize::from(addr - base);
            (offset < values.len()).then_some((*base, offset))
        })
    }

    /// Collect `quantity` consecutive values starting at `start`.
    ///
    /// Runs are flattened; each requested address must be covered by
    /// some entry.
    pub fn read_range(&self, start: Address, quantity: Quantity) -> Result<Vec<T>, Exception> {
        let mut values = Vec::with_capacity(usize::from(quantity));
        for addr in address_range(start, quantity)? {
            let (base, offset) = self.resolve(addr).ok_or(Exception::IllegalDataAddress)?;
            values.push(self.slots[&base][offset]);
        }
        Ok(values)
    }

    /// Store consecutive values starting at `start`, all-or-none.
    ///
    /// Every target address is verified before the first element is
    /// written, so an invalid address never leaves a partial write
    /// behind. Returns the bases of the slots that were touched.
    pub fn write_range(
        &mut self,
        start: Address,
        values: &[T],
    ) -> Result<Vec<Address>, Exception> {
        let mut located = Vec::with_capacity(values.len());
        for addr in address_range(start, values.len() as Quantity)? {
            located.push(self.resolve(addr).ok_or(Exception::IllegalDataAddress)?);
        }

        let mut touched: Vec<Address> = Vec::new();
        for ((base, offset), value) in located.into_iter().zip(values.iter()) {
            self.slots.get_mut(&base).expect("resolved slot")[offset] = *value;
            if touched.last() != Some(&base) {
                touched.push(base);
            }
        }
        Ok(touched)
    }

    /// Fire the write hooks of the given slot bases.
    fn run_hooks(&self, touched: &[Address]) {
        for base in touched {
            if let Some(hook) = self.hooks.get(base) {
                if let Err(err) = hook(*base, &self.slots[base]) {
                    log::warn!("Write hook for address {base} failed: {err}");
                }
            }
        }
    }
}

/// The requested address range, or `IllegalDataAddress` if it would run
/// beyond the 16 bit address space.
fn address_range(
    start: Address,
    quantity: Quantity,
) -> Result<impl Iterator<Item = Address>, Exception> {
    let end = u32::from(start) + u32::from(quantity);
    if end > u32::from(Address::MAX) + 1 {
        return Err(Exception::IllegalDataAddress);
    }
    Ok((u32::from(start)..end).map(|addr| addr as Address))
}

/// Writes applied through the dispatcher since the journal was last taken.
///
/// Only the wire-writable banks can accumulate changes: coils via
/// functions 0x05/0x0F and holding registers via 0x06/0x10/0x17.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterChanges {
    pub coils: BTreeMap<Address, Coil>,
    pub holding_registers: BTreeMap<Address, Word>,
}

impl RegisterChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coils.is_empty() && self.holding_registers.is_empty()
    }
}

/// The four register banks of a responder.
#[derive(Debug, Default)]
pub struct RegisterStore {
    coils: Bank<Coil>,
    discrete_inputs: Bank<Coil>,
    holding_registers: Bank<Word>,
    input_registers: Bank<Word>,
    changes: RegisterChanges,
}

impl RegisterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coils(&self) -> &Bank<Coil> {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut Bank<Coil> {
        &mut self.coils
    }

    pub fn discrete_inputs(&self) -> &Bank<Coil> {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut Bank<Coil> {
        &mut self.discrete_inputs
    }

    pub fn holding_registers(&self) -> &Bank<Word> {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut Bank<Word> {
        &mut self.holding_registers
    }

    pub fn input_registers(&self) -> &Bank<Word> {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut Bank<Word> {
        &mut self.input_registers
    }

    /// Return the accumulated change journal and clear it.
    pub fn take_changes(&mut self) -> RegisterChanges {
        std::mem::take(&mut self.changes)
    }

    /// Answer a read request against the banks.
    pub fn handle_read(&self, req: &Request) -> Result<Response, Exception> {
        match req {
            Request::ReadCoils(addr, quantity) => {
                check_quantity(*quantity, MAX_READ_BITS)?;
                self.coils.read_range(*addr, *quantity).map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(addr, quantity) => {
                check_quantity(*quantity, MAX_READ_BITS)?;
                self.discrete_inputs
                    .read_range(*addr, *quantity)
                    .map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(addr, quantity) => {
                check_quantity(*quantity, MAX_READ_WORDS)?;
                self.holding_registers
                    .read_range(*addr, *quantity)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, quantity) => {
                check_quantity(*quantity, MAX_READ_WORDS)?;
                self.input_registers
                    .read_range(*addr, *quantity)
                    .map(Response::ReadInputRegisters)
            }
            _ => Err(Exception::IllegalFunction),
        }
    }

    /// Apply a write request to the banks.
    ///
    /// Successful writes are recorded in the change journal and trigger
    /// the write hooks of the touched slots.
    pub fn handle_write(&mut self, req: &Request) -> Result<Response, Exception> {
        match req {
            Request::WriteSingleCoil(addr, coil) => {
                let touched = self.coils.write_range(*addr, &[*coil])?;
                self.changes.coils.insert(*addr, *coil);
                self.coils.run_hooks(&touched);
                Ok(Response::WriteSingleCoil(*addr, *coil))
            }
            Request::WriteSingleRegister(addr, word) => {
                let touched = self.holding_registers.write_range(*addr, &[*word])?;
                self.changes.holding_registers.insert(*addr, *word);
                self.holding_registers.run_hooks(&touched);
                Ok(Response::WriteSingleRegister(*addr, *word))
            }
            Request::WriteMultipleCoils(addr, coils) => {
                check_quantity(coils.len() as Quantity, MAX_WRITE_BITS)?;
                let touched = self.coils.write_range(*addr, coils)?;
                for (i, coil) in coils.iter().enumerate() {
                    self.changes.coils.insert(addr + i as Address, *coil);
                }
                self.coils.run_hooks(&touched);
                Ok(Response::WriteMultipleCoils(*addr, coils.len() as Quantity))
            }
            Request::WriteMultipleRegisters(addr, words) => {
                check_quantity(words.len() as Quantity, MAX_WRITE_WORDS)?;
                let touched = self.holding_registers.write_range(*addr, words)?;
                self.record_register_changes(*addr, words);
                self.holding_registers.run_hooks(&touched);
                Ok(Response::WriteMultipleRegisters(
                    *addr,
                    words.len() as Quantity,
                ))
            }
            Request::ReadWriteMultipleRegisters(read_addr, read_quantity, write_addr, words) => {
                check_quantity(*read_quantity, MAX_READ_WORDS)?;
                check_quantity(words.len() as Quantity, MAX_WRITE_WORDS)?;
                // The write is performed before the read, as the
                // application protocol specifies.
                let touched = self.holding_registers.write_range(*write_addr, words)?;
                self.record_register_changes(*write_addr, words);
                self.holding_registers.run_hooks(&touched);
                self.holding_registers
                    .read_range(*read_addr, *read_quantity)
                    .map(Response::ReadWriteMultipleRegisters)
            }
            _ => Err(Exception::IllegalFunction),
        }
    }

    /// Dispatch any request to the appropriate bank operation.
    pub fn handle(&mut self, req: &Request) -> Result<Response, Exception> {
        if is_read_request(req) {
            self.handle_read(req)
        } else {
            self.handle_write(req)
        }
    }

    fn record_register_changes(&mut self, addr: Address, words: &[Word]) {
        for (i, word) in words.iter().enumerate() {
            self.changes
                .holding_registers
                .insert(addr + i as Address, *word);
        }
    }
}

/// Whether the request only needs shared access to the store.
pub(crate) fn is_read_request(req: &Request) -> bool {
    matches!(
        req,
        Request::ReadCoils(_, _)
            | Request::ReadDiscreteInputs(_, _)
            | Request::ReadHoldingRegisters(_, _)
            | Request::ReadInputRegisters(_, _)
    )
}

fn check_quantity(quantity: Quantity, max: Quantity) -> Result<(), Exception> {
    if quantity < 1 || quantity > max {
        return Err(Exception::IllegalDataValue);
    }
    Ok(())
}
