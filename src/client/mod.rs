// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous Modbus client (initiator)

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    frame::*,
    unit::*,
};

/// A transport independent asynchronous client trait.
#[async_trait]
pub trait Client: UnitContext + Debug + Send {
    /// Invoke a generic Modbus function.
    async fn call(&mut self, request: Request) -> Result<Response>;
}

/// An asynchronous Modbus reader.
#[async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// An asynchronous Modbus writer.
#[async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// An asynchronous Modbus client context.
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(from: Context) -> Self {
        from.client
    }
}

#[async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request) -> Result<Response> {
        self.client.call(request).await
    }
}

impl UnitContext for Context {
    fn set_unit(&mut self, unit: Unit) {
        self.client.set_unit(unit);
    }
}

fn check_quantity(cnt: Quantity, max: Quantity) -> Result<()> {
    if cnt < 1 || cnt > max {
        return Err(Error::InvalidArgument("quantity out of range".into()));
    }
    Ok(())
}

#[async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, MAX_READ_BITS)?;
        let rsp = self.client.call(Request::ReadCoils(addr, cnt)).await?;
        let Response::ReadCoils(mut coils) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if coils.len() < cnt as usize {
            return Err(Error::Validation("too few coils returned".into()));
        }
        // The response always contains entire bytes, i.e. a multiple of
        // 8 coils. Only the requested prefix is meaningful.
        coils.truncate(cnt as usize);
        Ok(coils)
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, MAX_READ_BITS)?;
        let rsp = self
            .client
            .call(Request::ReadDiscreteInputs(addr, cnt))
            .await?;
        let Response::ReadDiscreteInputs(mut inputs) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if inputs.len() < cnt as usize {
            return Err(Error::Validation("too few inputs returned".into()));
        }
        inputs.truncate(cnt as usize);
        Ok(inputs)
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, MAX_READ_WORDS)?;
        let rsp = self
            .client
            .call(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        let Response::ReadHoldingRegisters(words) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if words.len() != cnt as usize {
            return Err(Error::Validation("unexpected register count".into()));
        }
        Ok(words)
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, MAX_READ_WORDS)?;
        let rsp = self
            .client
            .call(Request::ReadInputRegisters(addr, cnt))
            .await?;
        let Response::ReadInputRegisters(words) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if words.len() != cnt as usize {
            return Err(Error::Validation("unexpected register count".into()));
        }
        Ok(words)
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        check_quantity(read_count, MAX_READ_WORDS)?;
        check_quantity(write_data.len() as Quantity, MAX_WRITE_WORDS)?;
        let rsp = self
            .client
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_count,
                write_addr,
                write_data.to_vec(),
            ))
            .await?;
        let Response::ReadWriteMultipleRegisters(words) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if words.len() != read_count as usize {
            return Err(Error::Validation("unexpected register count".into()));
        }
        Ok(words)
    }
}

#[async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        let rsp = self.client.call(Request::WriteSingleCoil(addr, coil)).await?;
        let Response::WriteSingleCoil(rsp_addr, rsp_coil) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if rsp_addr != addr || rsp_coil != coil {
            return Err(Error::Validation("write echo mismatch".into()));
        }
        Ok(())
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        check_quantity(coils.len() as Quantity, MAX_WRITE_BITS)?;
        let cnt = coils.len();
        let rsp = self
            .client
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?;
        let Response::WriteMultipleCoils(rsp_addr, rsp_cnt) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
            return Err(Error::Validation("write echo mismatch".into()));
        }
        Ok(())
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        let rsp = self
            .client
            .call(Request::WriteSingleRegister(addr, word))
            .await?;
        let Response::WriteSingleRegister(rsp_addr, rsp_word) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if rsp_addr != addr || rsp_word != word {
            return Err(Error::Validation("write echo mismatch".into()));
        }
        Ok(())
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        check_quantity(words.len() as Quantity, MAX_WRITE_WORDS)?;
        let cnt = words.len();
        let rsp = self
            .client
            .call(Request::WriteMultipleRegisters(addr, words.to_vec()))
            .await?;
        let Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) = rsp else {
            return Err(Error::Correlation("unexpected response".into()));
        };
        if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
            return Err(Error::Validation("write echo mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct ClientMock {
        unit: Option<Unit>,
        last_request: Option<Request>,
        next_response: Option<Result<Response>>,
    }

    impl ClientMock {
        fn set_next_response(&mut self, next_response: Result<Response>) {
            self.next_response = Some(next_response);
        }
    }

    #[async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, request: Request) -> Result<Response> {
            self.last_request = Some(request);
            self.next_response.take().unwrap()
        }
    }

    impl UnitContext for ClientMock {
        fn set_unit(&mut self, unit: Unit) {
            self.unit = Some(unit);
        }
    }

    fn context_with_response(rsp: Response) -> Context {
        let mut client = Box::<ClientMock>::default();
        client.set_next_response(Ok(rsp));
        Context { client }
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The protocol always returns entire bytes, i.e. a multiple
        // of 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true];
        for num_coils in 1..8 {
            let mut context = context_with_response(Response::ReadCoils(response_coils.to_vec()));
            let coils = context.read_coils(1, num_coils).await.unwrap();
            assert_eq!(&response_coils[0..num_coils as usize], &coils[..]);
        }
    }

    #[tokio::test]
    async fn read_some_discrete_inputs() {
        let response_inputs = [true, false, false, true, false, true, false, true];
        for num_inputs in 1..8 {
            let mut context =
                context_with_response(Response::ReadDiscreteInputs(response_inputs.to_vec()));
            let inputs = context.read_discrete_inputs(1, num_inputs).await.unwrap();
            assert_eq!(&response_inputs[0..num_inputs as usize], &inputs[..]);
        }
    }

    #[tokio::test]
    async fn quantity_is_checked_before_any_io() {
        let mut context = Context {
            client: Box::<ClientMock>::default(),
        };
        // an unset mock response would panic if the call went through
        assert!(matches!(
            context.read_coils(0, 0).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            context.read_coils(0, 2001).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            context.read_holding_registers(0, 126).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            context.write_multiple_coils(0, &[false; 1969]).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            context.write_multiple_registers(0, &[0; 124]).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn write_single_coil_validates_echo() {
        let mut context = context_with_response(Response::WriteSingleCoil(33, true));
        assert!(context.write_single_coil(33, true).await.is_ok());

        let mut context = context_with_response(Response::WriteSingleCoil(34, true));
        assert!(matches!(
            context.write_single_coil(33, true).await,
            Err(Error::Validation(_))
        ));

        let mut context = context_with_response(Response::WriteSingleCoil(33, false));
        assert!(matches!(
            context.write_single_coil(33, true).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn write_multiple_registers_validates_echo() {
        let mut context = context_with_response(Response::WriteMultipleRegisters(1, 2));
        assert!(context.write_multiple_registers(1, &[10, 258]).await.is_ok());

        let mut context = context_with_response(Response::WriteMultipleRegisters(1, 3));
        assert!(matches!(
            context.write_multiple_registers(1, &[10, 258]).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn mismatching_response_kind_is_rejected() {
        let mut context = context_with_response(Response::ReadCoils(vec![true]));
        assert!(matches!(
            context.read_holding_registers(0, 1).await,
            Err(Error::Correlation(_))
        ));
    }
}
