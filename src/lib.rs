//! Faregate library
//!
//! Ticket validation and real-time notification core for the bus-ticketing
//! platform. Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
