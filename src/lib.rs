//! D-LOGG serial data logger driver.
//!
//! Talks the 1DL dialect of the Technische Alternative D-LOGG/BL232 over a
//! serial port: identity queries, logging criterion, live data, the memory
//! header and ranged retrieval of stored samples.
//!
//! # Transfers
//!
//! Fetching samples opens a transfer on the device. It stays open until
//! [`DLogg::fetch_end`] is called, and the session refuses other commands in
//! the meantime. [`DLogg::fetch_all_data`] does the whole cycle in one call.
//!
//! # Positions
//!
//! The logger stores samples in a ring of 8192 slots. Samples are addressed by
//! logical position, which keeps increasing across the ring wrap; the header's
//! [`HeaderInfo::start_position`] is the oldest stored sample.

pub mod address;
pub mod codec;
pub mod definitions;
mod errors;
pub mod fetch;
pub mod logging;
pub mod records;
mod session;
pub mod sim;
pub mod transport;

pub use address::{Address, RING_SIZE};
pub use definitions::{DeviceType, FirmwareVersion, LoggingCriterion, Mode};
pub use errors::*;
pub use records::{
    CurrentData, DateTime, HeaderInfo, Input, InputValue, Measurements, Outputs, PumpSpeed,
    Sample,
};
pub use session::{DLogg, DeviceIdentity, Opener, SessionConfig, BAUD_RATE, DEFAULT_TIMEOUT};
pub use sim::SimulatedLogger;
pub use transport::{Connection, Link};
