use super::types::{Action, State};

/// Whether `action` may be applied to a task currently in `from`.
///
/// Pending is the sole initial state; Completed and Failed are quiescent
/// but can be revived by Restart.
pub fn valid_state_transition(action: Action, from: State) -> bool {
    matches!(
        (action, from),
        (Action::Schedule, State::Pending)
            | (Action::Start, State::Scheduled)
            | (Action::Stop, State::Running)
            | (Action::Fail, State::Scheduled | State::Running)
            | (
                Action::Restart,
                State::Running | State::Completed | State::Failed
            )
    )
}
