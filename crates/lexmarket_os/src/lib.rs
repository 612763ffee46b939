#![forbid(unsafe_code)]

pub mod payment_watch;
pub mod payment_watch_driver;
pub mod quote_acceptance;
pub mod route_guard;
pub mod session;
