pub mod capability;
pub mod claim;
pub mod mock;
pub mod session;
pub mod state_machine;

pub use capability::DeviceCapability;
pub use claim::{ClaimRegistry, OperationName};
pub use session::{DeviceEvent, DeviceSession};
