use crate::CoreError;
use warden_schema::EngineState;

pub fn validate_transition(from: EngineState, to: EngineState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (EngineState::Stopped, EngineState::Preparing)
            | (
                EngineState::Preparing,
                EngineState::Running | EngineState::Stopped
            )
            | (
                EngineState::Running,
                EngineState::Stopping | EngineState::Stopped
            )
            | (EngineState::Stopping, EngineState::Stopped)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}
