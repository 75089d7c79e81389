pub mod expiry;
pub mod registry;

pub use expiry::ExpirySweeper;
pub use registry::{ActionRegistry, TryApplyError};
