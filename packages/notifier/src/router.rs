//! Event routing: which delivery, if any, an (action, status) pair triggers.

use std::fmt;

use fspiop::{EndpointTemplate, EndpointType, HttpMethod};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Prepare,
    Commit,
    Reject,
    Abort,
    TimeoutReceived,
    Other(String),
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prepare" => Action::Prepare,
            "commit" => Action::Commit,
            "reject" => Action::Reject,
            "abort" => Action::Abort,
            "timeout-received" => Action::TimeoutReceived,
            _ => Action::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Prepare => "prepare",
            Action::Commit => "commit",
            Action::Reject => "reject",
            Action::Abort => "abort",
            Action::TimeoutReceived => "timeout-received",
            Action::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Other(String),
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Status::Success,
            "failure" | "failed" => Status::Failure,
            _ => Status::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how a callback goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub endpoint_type: EndpointType,
    pub template: EndpointTemplate,
    pub method: HttpMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Send the payload to the destination FSP.
    ForwardCallback(Delivery),
    /// Emit a fulfilment event for the transfer.
    FulfilReemission(Delivery),
    /// Nothing to deliver.
    Unhandled { action: Action, status: Status },
}

impl Route {
    pub fn delivery(&self) -> Option<&Delivery> {
        match self {
            Route::ForwardCallback(d) | Route::FulfilReemission(d) => Some(d),
            Route::Unhandled { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Route::ForwardCallback(_) => "forward_callback",
            Route::FulfilReemission(_) => "fulfil_reemission",
            Route::Unhandled { .. } => "unhandled",
        }
    }
}

pub fn route(action: &Action, status: &Status) -> Route {
    match (action, status) {
        (Action::Prepare, Status::Success) => Route::ForwardCallback(Delivery {
            endpoint_type: EndpointType::TransferPost,
            template: EndpointTemplate::TransfersPutError,
            method: HttpMethod::Put,
        }),
        (Action::Commit, Status::Success) => Route::FulfilReemission(Delivery {
            endpoint_type: EndpointType::TransferPut,
            template: EndpointTemplate::TransfersPut,
            method: HttpMethod::Put,
        }),
        (action, status) => Route::Unhandled {
            action: action.clone(),
            status: status.clone(),
        },
    }
}

/// Per-message lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Validated,
    Routed,
    Delivered,
    Skipped,
    Committed,
}

impl ProcessingState {
    pub fn can_advance_to(&self, next: ProcessingState) -> bool {
        use ProcessingState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Routed)
                | (Routed, Delivered)
                | (Routed, Skipped)
                | (Delivered, Committed)
                | (Skipped, Committed)
                // failures commit from wherever processing stopped
                | (Received, Committed)
                | (Validated, Committed)
                | (Routed, Committed)
        )
    }

    /// Move to `next`, logging the transition.
    pub fn advance(&mut self, next: ProcessingState) {
        if self.can_advance_to(next) {
            debug!(from = ?self, to = ?next, "processing state");
        } else {
            warn!(from = ?self, to = ?next, "unexpected processing state transition");
        }
        *self = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Action::parse("PREPARE"), Action::Prepare);
        assert_eq!(Action::parse(" Commit "), Action::Commit);
        assert_eq!(Action::parse("prepare-duplicate"), Action::Other("prepare-duplicate".into()));
        assert_eq!(Status::parse("SUCCESS"), Status::Success);
        assert_eq!(Status::parse("pending"), Status::Other("pending".into()));
    }

    #[test]
    fn test_prepare_success_forwards_callback() {
        let route = route(&Action::Prepare, &Status::Success);
        assert_eq!(
            route,
            Route::ForwardCallback(Delivery {
                endpoint_type: EndpointType::TransferPost,
                template: EndpointTemplate::TransfersPutError,
                method: HttpMethod::Put,
            })
        );
    }

    #[test]
    fn test_commit_success_reemits_fulfilment() {
        let route = route(&Action::Commit, &Status::Success);
        let delivery = route.delivery().copied().unwrap();
        assert!(matches!(route, Route::FulfilReemission(_)));
        assert_eq!(delivery.endpoint_type, EndpointType::TransferPut);
        assert_eq!(delivery.template, EndpointTemplate::TransfersPut);
    }

    #[test]
    fn test_other_pairs_are_unhandled() {
        for (action, status) in [
            (Action::Abort, Status::Success),
            (Action::Prepare, Status::Failure),
            (Action::Commit, Status::Other("pending".into())),
            (Action::Reject, Status::Success),
        ] {
            let route = route(&action, &status);
            assert!(route.delivery().is_none());
            assert_eq!(route, Route::Unhandled { action, status });
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(ProcessingState::Routed.can_advance_to(ProcessingState::Skipped));
        assert!(ProcessingState::Received.can_advance_to(ProcessingState::Committed));
        assert!(!ProcessingState::Committed.can_advance_to(ProcessingState::Received));
        assert!(!ProcessingState::Skipped.can_advance_to(ProcessingState::Delivered));

        let mut state = ProcessingState::Received;
        state.advance(ProcessingState::Validated);
        assert_eq!(state, ProcessingState::Validated);
    }
}
