//! Core value types shared by the readers, the aggregator and the coordinator.

mod market;
mod price;

pub use market::*;
pub use price::*;
