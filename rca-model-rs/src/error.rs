use thiserror::Error;

/// Structural problems with an incident or one of its chains.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{what} score {value} is outside [0, 1]")]
    ScoreOutOfRange { what: String, value: f64 },

    #[error("severity {0} is outside [0, 1]")]
    SeverityOutOfRange(f64),

    #[error("chain has no steps")]
    EmptyChain,

    #[error("whyIndex must be at least 1, got {0}")]
    InvalidWhyIndex(u8),

    #[error("whyIndex {next} does not increase past {previous}")]
    NonMonotonicWhyIndex { previous: u8, next: u8 },

    #[error("invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("chain {chain}: {source}")]
    InChain {
        chain: usize,
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    pub fn missing(field: &'static str) -> Self {
        ModelError::MissingField { field }
    }

    pub fn in_chain(chain: usize, source: ModelError) -> Self {
        ModelError::InChain {
            chain,
            source: Box::new(source),
        }
    }
}

/// Failure reported by an identifier lookup collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("identifier lookup failed: {0}")]
pub struct LookupError(pub String);
