pub mod domain;
pub mod nats;
pub mod particle;
pub mod telemetry;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
