//! Incident causal-chain model.
//!
//! An [`RcaIncident`] holds the impact under investigation plus the causal
//! chains found for it, ranked best first. Fields that may arrive as opaque
//! identifiers are [`ResolvedField`]s and get their display names from an
//! [`IdentifierResolver`].

pub mod error;
pub mod field;
pub mod incident;
pub mod resolver;
pub mod time_ring;
pub mod validation;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use error::{LookupError, ModelError};
pub use field::ResolvedField;
pub use incident::{
    EvidenceRef, GraphDirection, ImpactDirection, IncidentContext, IncidentTimeWindow, RcaChain,
    RcaIncident, RcaStep, StepTimeRange,
};
pub use resolver::{contains_identifier, IdentifierLookup, IdentifierResolver, LookupRecord, MapLookup};
pub use time_ring::{RingDefinition, TimeRing, TimeRingConfig};
