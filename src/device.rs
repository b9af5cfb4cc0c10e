//! The seam between the device state models and whatever moves registers
//! around for them.

use crate::connection;
use crate::faults::FaultList;
use crate::registers::{Register, Space, WordOrder};
use crate::values::{self, DecodeError};

/// Capability set the device models need from a link: blocking-style register
/// reads and single-register writes. [`connection::Connection`] implements
/// this for real links; tests implement it with scripted responses.
pub trait Transport {
    fn read_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, connection::Error>>;
    fn read_holdings(
        &self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, connection::Error>>;
    fn write_holding(
        &self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), connection::Error>>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read `{register}` (register {address})")]
    Read {
        register: &'static str,
        address: u16,
        #[source]
        source: connection::Error,
    },
    #[error("could not write `{register}` (register {address})")]
    Write {
        register: &'static str,
        address: u16,
        #[source]
        source: connection::Error,
    },
    #[error("could not decode `{register}` (register {address})")]
    Decode {
        register: &'static str,
        address: u16,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    FrequencyOutOfRange(#[from] values::FrequencyOutOfRange),
    #[error(
        "compressor did not reach {expected} (stuck in {state}; errors: {})",
        .errors.as_ref().map_or_else(|| "not read".to_string(), |e| e.to_string())
    )]
    CommandFailed {
        expected: &'static str,
        state: crate::compressor::OperatingState,
        /// Decoded error accumulator, when the failure path reads it. The
        /// power-off path does not: the panel exposes no distinct off-failure
        /// code there.
        errors: Option<FaultList>,
    },
}

impl Error {
    pub(crate) fn read(register: &Register, source: connection::Error) -> Self {
        Error::Read { register: register.name, address: register.address, source }
    }

    pub(crate) fn write(register: &Register, source: connection::Error) -> Self {
        Error::Write { register: register.name, address: register.address, source }
    }

    pub(crate) fn decode(register: &Register, source: DecodeError) -> Self {
        Error::Decode { register: register.name, address: register.address, source }
    }
}

pub(crate) async fn read_words<T: Transport>(
    transport: &T,
    register: &Register,
) -> Result<Vec<u16>, Error> {
    let read = match register.space {
        Space::Input => transport.read_inputs(register.address, register.words()).await,
        Space::Holding => transport.read_holdings(register.address, register.words()).await,
    };
    read.map_err(|e| Error::read(register, e))
}

pub(crate) async fn read_u16<T: Transport>(
    transport: &T,
    register: &Register,
) -> Result<u16, Error> {
    let words = read_words(transport, register).await?;
    values::decode_u16(&words).map_err(|e| Error::decode(register, e))
}

pub(crate) async fn read_i32<T: Transport>(
    transport: &T,
    register: &Register,
    order: WordOrder,
) -> Result<i32, Error> {
    let words = read_words(transport, register).await?;
    values::decode_i32(&words, order).map_err(|e| Error::decode(register, e))
}

pub(crate) async fn read_u32<T: Transport>(
    transport: &T,
    register: &Register,
    order: WordOrder,
) -> Result<u32, Error> {
    let words = read_words(transport, register).await?;
    values::decode_u32(&words, order).map_err(|e| Error::decode(register, e))
}

pub(crate) async fn read_f32<T: Transport>(
    transport: &T,
    register: &Register,
    order: WordOrder,
) -> Result<f32, Error> {
    let words = read_words(transport, register).await?;
    values::decode_f32(&words, order).map_err(|e| Error::decode(register, e))
}

pub(crate) async fn write_u16<T: Transport>(
    transport: &T,
    register: &Register,
    value: u16,
) -> Result<(), Error> {
    transport.write_holding(register.address, value).await.map_err(|e| Error::write(register, e))
}
