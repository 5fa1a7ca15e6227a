pub mod adapter;
pub mod client;
pub mod error;
pub mod twiml;
pub mod types;

pub use adapter::TelephonyAdapter;
pub use client::TelephonyClient;
pub use error::{Result, TelephonyError};
