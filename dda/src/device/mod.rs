//! Device identity and host-side device operations.

mod id;
pub mod pnp;
pub mod pool;
pub mod survey;

pub use id::{DeviceId, DeviceLocation, HOST_PREFIX, POOL_PREFIX};
pub use pnp::PnpDeviceInfo;
#[cfg(windows)]
pub use pnp::PnpDevices;
#[cfg(windows)]
pub use pool::DevicePool;
pub use survey::DeviceSurvey;
