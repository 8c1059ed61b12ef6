// Shared test fixtures, compiled only for unit tests.

pub mod entries;
pub mod processors;
pub mod transports;
