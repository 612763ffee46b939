#![forbid(unsafe_code)]

pub mod api_client;
pub mod device_vault;
pub mod realtime;
pub mod realtime_local;
pub mod realtime_pusher;
pub mod token_store;
