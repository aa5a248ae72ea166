//! Deterministic fakes for exercising the engine without a real sandbox
//! or repair service.

pub mod fake_repair;
pub mod fake_sandbox;
