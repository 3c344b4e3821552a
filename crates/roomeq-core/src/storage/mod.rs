//! Persisted capture records and derived aggregate views

pub mod aggregate;
pub mod store;
