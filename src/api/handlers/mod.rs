//! API request handlers

pub mod containers;
pub mod exec;
pub mod health;
pub mod networks;
pub mod system;
