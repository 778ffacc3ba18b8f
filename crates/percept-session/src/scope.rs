//! The replaceable current-utterance cancellation scope.

use tokio_util::sync::CancellationToken;

/// A handle on one utterance scope: its generation and cancellation token.
#[derive(Clone, Debug)]
pub struct ScopeTicket {
    /// Generation of the scope this ticket belongs to.
    pub generation: u64,
    /// Cancelled when the scope is replaced or the session stops.
    pub token: CancellationToken,
}

/// The current-utterance scope, a child of the session scope.
///
/// Exactly one scope is current at any time. [`rotate`](Self::rotate) cancels
/// the current token before installing its successor.
#[derive(Debug)]
pub struct UtteranceScope {
    session: CancellationToken,
    token: CancellationToken,
    generation: u64,
}

impl UtteranceScope {
    /// First scope (generation 0) under `session`.
    pub fn new(session: &CancellationToken) -> Self {
        Self {
            session: session.clone(),
            token: session.child_token(),
            generation: 0,
        }
    }

    /// Ticket for the current scope.
    pub fn ticket(&self) -> ScopeTicket {
        ScopeTicket {
            generation: self.generation,
            token: self.token.clone(),
        }
    }

    /// Cancel the current scope and replace it with a fresh one.
    pub fn rotate(&mut self) -> ScopeTicket {
        self.token.cancel();
        self.generation += 1;
        self.token = self.session.child_token();
        self.ticket()
    }

    /// Generation of the current scope.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` names the current scope.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}
