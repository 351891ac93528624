pub mod config;
pub mod error;
pub mod range;
pub mod slot;
pub mod tick;

pub use config::Config;
pub use error::*;
pub use range::SlotRange;
pub use slot::{slot_order, RemoteFile, Slot};
pub use tick::Tick;
