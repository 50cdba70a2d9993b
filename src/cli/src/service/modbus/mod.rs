mod batch;
mod catalog;
mod connection;
mod encoding;
mod frame;
mod register;
mod service;
mod snapshot;
mod span;

pub(crate) use connection::{
  ConnectError, Connection, SerialParams, Transport,
};
pub(crate) use service::*;
pub(crate) use snapshot::{read_snapshot, Snapshot};

#[cfg(test)]
pub(crate) use frame::FunctionCode;
#[cfg(test)]
pub(crate) use snapshot::tests::FakeTransport;
