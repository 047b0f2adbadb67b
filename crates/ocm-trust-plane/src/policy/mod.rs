//! Peer policy

pub mod engine;

pub use engine::{MembershipSource, PolicyConfig, PolicyDecision, PolicyEngine, ReasonCode, AUDIT_TARGET};
