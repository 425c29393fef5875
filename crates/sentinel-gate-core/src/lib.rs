// sentinel-gate-core/src/lib.rs
// ============================================================================
// Module: Sentinel Gate Core Library
// Description: Public API surface for the Sentinel Gate core.
// Purpose: Expose the wire/data model, error taxonomy, and interceptor
//          contract shared by every stage of the gateway's request chain.
// Dependencies: crate::{apikey, audit, diagnostic, error, identity,
//                       interceptor, message, policy, ratecell, session, tool}
// ============================================================================

//! ## Overview
//! Sentinel Gate core is the self-contained, stand-alone-publishable half of
//! the gateway: it defines what a message, an identity, a session, a rate
//! cell, a routable tool, and an audit record are, and the closed error
//! taxonomy and interceptor trait every chain stage shares. It has no
//! dependency on the other workspace crates and no transport, storage, or
//! policy-engine implementation of its own — those live in
//! `sentinel-gate-gateway`, wired against the traits this crate defines.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod apikey;
pub mod audit;
pub mod diagnostic;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod message;
pub mod policy;
pub mod ratecell;
pub mod session;
pub mod tool;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use apikey::{ApiKey, ApiKeyError, HashScheme};
pub use audit::{AuditRecord, ScanFindings, REDACTED_MARKER};
pub use diagnostic::{DiagnosticEvent, DiagnosticSink, NoopDiagnosticSink, StderrDiagnosticSink};
pub use error::{GatewayError, Outcome, PolicyDenial, ValidationError};
pub use identity::{Identity, Role};
pub use interceptor::{InterceptStage, Interceptor, InterceptorChain};
pub use message::{Direction, JsonRpcEnvelope, Message};
pub use policy::{
    AllowAllPolicyEngine, ApprovalRequirement, EvaluationContext, PolicyDecision, PolicyEngine,
};
pub use ratecell::{Decision, GcraLimiter, GcraParams};
pub use session::{Session, SessionStore};
pub use tool::RoutableTool;
