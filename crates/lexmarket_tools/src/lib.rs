#![forbid(unsafe_code)]

pub mod case_cli;
pub mod payment_cli;
pub mod session_cli;
