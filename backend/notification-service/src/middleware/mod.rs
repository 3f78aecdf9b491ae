pub mod guards;

pub use guards::{AdminOnly, Authenticated, GateDecision, RequiredRole};
