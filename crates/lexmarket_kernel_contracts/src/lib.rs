#![forbid(unsafe_code)]

pub mod case;
pub mod common;
pub mod payment;
pub mod route;
pub mod session;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
