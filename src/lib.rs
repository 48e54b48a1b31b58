//! Splitdns - a split-horizon DNS dispatcher.
//!
//! Queries are raced between a fast "local" resolver group and a trusted
//! "remote" group; local answers are only taken at face value when they come
//! from a trusted upstream or point into the trusted IP range.

pub mod cache;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod group;
pub mod matcher;
pub mod proxy;
pub mod stats;
pub mod transport;
pub mod upstream;
pub mod validator;

pub use error::{Error, Result};
