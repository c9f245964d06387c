// bath_simulator/src/lib.rs - Simulated bath and controller board for exercising the host
pub mod device;
pub mod physics;

pub use device::{DeviceStats, FaultPlan, SimulatedDevice};
pub use physics::BathPhysics;
