//! End-to-end deployment flows against the proxy contract running in a
//! soroban test environment.

pub mod utils;
