use thiserror::Error;

/// Faults a collaborator can raise across the bridge seam. The `Display`
/// output is exactly what the stream surfaces in `error` events.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("{0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::AgentError;

    #[test]
    fn init_and_decomposition_are_prefixed() {
        assert_eq!(
            AgentError::Init("no api key".to_string()).to_string(),
            "Initialization error: no api key"
        );
        assert_eq!(
            AgentError::Decomposition("bad json".to_string()).to_string(),
            "Decomposition error: bad json"
        );
    }

    #[test]
    fn execution_keeps_raw_message() {
        assert_eq!(
            AgentError::Execution("boom".to_string()).to_string(),
            "boom"
        );
    }
}
