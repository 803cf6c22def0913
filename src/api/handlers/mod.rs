mod system;

#[cfg(test)]
mod system_test;

pub use system::{DatabaseHealth, HealthResponse, health};
