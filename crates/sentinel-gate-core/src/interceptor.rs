// sentinel-gate-core/src/interceptor.rs
// ============================================================================
// Module: Interceptor contract
// Description: The trait every stage of the proxy's ordered chain implements.
// Purpose: Let the chain be assembled, reordered, and tested as a plain
//          `Vec<Box<dyn Interceptor>>` rather than hand-wired control flow.
// Dependencies: async-trait
// ============================================================================

//! ## Overview
//! The chain is `Validation -> IPRateLimit -> Auth -> UserRateLimit -> Audit
//! -> Policy -> Router`. Each stage sees every message that reaches it and
//! decides to forward, replace, or reject. A stage that rejects stops the
//! chain immediately; nothing downstream of it runs for that message.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::message::Message;

/// One named position in the ordered interceptor chain.
pub trait Interceptor: Send + Sync {
    /// A short, stable name for this stage, used in diagnostics and audit
    /// records naming which stage produced a rejection.
    fn name(&self) -> &'static str;
}

/// The chain-running contract: given the message built so far, either let
/// it continue (mutated in place, e.g. to attach a resolved identity) or
/// reject it with a [`GatewayError`] that stops the chain.
///
/// Implementations may be synchronous internally but the trait is async
/// because several stages (auth lookup, policy evaluation, audit writes)
/// are backed by I/O.
#[async_trait]
pub trait InterceptStage: Interceptor {
    /// Processes `message`, mutating it in place to forward or replacing it
    /// with a synthesized response.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] that should stop the chain and be
    /// reported to the client, if this stage rejects the message.
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError>;
}

/// Runs a fixed ordered chain of stages against one message, stopping at
/// the first rejection.
pub struct InterceptorChain {
    stages: Vec<Box<dyn InterceptStage>>,
}

impl InterceptorChain {
    /// Builds a chain from an already-ordered list of stages.
    #[must_use]
    pub fn new(stages: Vec<Box<dyn InterceptStage>>) -> Self {
        Self { stages }
    }

    /// Names of the stages in execution order, for diagnostics.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage against `message` in order, stopping at (and
    /// returning) the first rejection.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`GatewayError`] that rejects the message.
    pub async fn run(&self, message: &mut Message) -> Result<(), GatewayError> {
        for stage in &self.stages {
            stage.intercept(message).await?;
        }
        Ok(())
    }
}
