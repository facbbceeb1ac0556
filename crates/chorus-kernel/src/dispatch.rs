use chorus_contracts::{Outcome, OutcomeKind};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchState {
    #[default]
    Idle,
    AwaitingResolution,
    Dispatched(OutcomeKind),
    Completed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid dispatch transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: DispatchState,
    pub to: DispatchState,
}

/// Per-request state machine: `Idle -> AwaitingResolution -> Dispatched -> Completed`.
///
/// A dispatcher lives for exactly one request. Each transition is accepted
/// once; replaying one returns a `TransitionError`, which is what keeps a
/// second outcome or a second completion from reaching the caller.
#[derive(Debug, Default)]
pub struct Dispatcher {
    state: DispatchState,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.advance(DispatchState::Idle, DispatchState::AwaitingResolution)
    }

    /// Binds the request to the outcome's kind and returns the event name it
    /// is dispatched under.
    pub fn dispatch(&mut self, outcome: &Outcome) -> Result<&'static str, TransitionError> {
        let kind = outcome.kind();
        self.advance(
            DispatchState::AwaitingResolution,
            DispatchState::Dispatched(kind),
        )?;
        Ok(event_name(kind))
    }

    pub fn complete(&mut self) -> Result<OutcomeKind, TransitionError> {
        match self.state {
            DispatchState::Dispatched(kind) => {
                self.state = DispatchState::Completed;
                Ok(kind)
            }
            from => Err(TransitionError {
                from,
                to: DispatchState::Completed,
            }),
        }
    }

    fn advance(&mut self, from: DispatchState, to: DispatchState) -> Result<(), TransitionError> {
        if self.state != from {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

pub fn event_name(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::SimpleResponse => "conversation.simple_response",
        OutcomeKind::BackendResponse => "conversation.backend_response",
        OutcomeKind::History => "conversation.history",
        OutcomeKind::SyncConversation => "conversation.sync_conversation",
        OutcomeKind::AsyncConversation => "conversation.async_conversation",
        OutcomeKind::MoreInformationNeeded => "conversation.more_information_needed",
        OutcomeKind::NoIntentFound => "conversation.no_intent_found",
        OutcomeKind::Federated => "conversation.federated",
        OutcomeKind::Completed => "conversation.completed",
    }
}
