#![no_std]

#[cfg(test)]
extern crate std;

pub mod command;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod frame;
pub mod index_table;
pub mod port;
pub mod wire;

pub use command::CommandType;
pub use engine::{Wkc, NO_FRAME};
pub use error::CoreError;
pub use index_table::{IndexTable, SlotState};
pub use port::{MasterClock, MonotonicClock, NicPort};
