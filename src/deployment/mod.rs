//! Stream lifecycle orchestration.

mod controller;
mod locks;

pub use controller::DeploymentController;
