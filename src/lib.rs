pub mod buffer;
pub mod config;
pub mod convert;
pub mod decode;
pub mod error;
pub mod flush;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod transport;
