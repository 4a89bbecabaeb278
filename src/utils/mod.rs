//! Shared numeric utilities
//!
//! Execution device, random initialization, Householder QR and the tensor
//! helpers used across layers, losses and optimizers.

pub mod device;
pub mod qr;
pub mod rng;
pub mod tensor;

pub use device::Device;
pub use qr::HouseholderQr;
pub use rng::SimpleRng;
