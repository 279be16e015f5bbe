//! Structural checks applied before an incident is accepted for narration.

use crate::error::ModelError;
use crate::incident::{IncidentContext, RcaChain, RcaIncident, RcaStep};

fn check_unit(what: impl Into<String>, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ModelError::ScoreOutOfRange {
            what: what.into(),
            value,
        })
    }
}

impl IncidentContext {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.impact_service.is_empty() {
            return Err(ModelError::missing("impact.impactService"));
        }
        if self.metric_name.is_empty() {
            return Err(ModelError::missing("impact.metricName"));
        }
        if !self.window.is_valid() {
            return Err(ModelError::InvalidTimeWindow(format!(
                "expected start < peak <= end, got {} / {} / {}",
                self.window.start, self.window.peak, self.window.end
            )));
        }
        if !(self.severity.is_finite() && (0.0..=1.0).contains(&self.severity)) {
            return Err(ModelError::SeverityOutOfRange(self.severity));
        }
        Ok(())
    }
}

impl RcaStep {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.why_index == 0 {
            return Err(ModelError::InvalidWhyIndex(0));
        }
        if self.service.is_empty() {
            return Err(ModelError::missing("step.service"));
        }
        check_unit(format!("step {}", self.why_index), self.score)
    }
}

impl RcaChain {
    pub fn validate(&self) -> Result<(), ModelError> {
        check_unit("chain", self.score)?;
        if self.steps.is_empty() {
            return Err(ModelError::EmptyChain);
        }
        let mut previous: Option<u8> = None;
        for step in &self.steps {
            step.validate()?;
            if let Some(prev) = previous {
                if step.why_index <= prev {
                    return Err(ModelError::NonMonotonicWhyIndex {
                        previous: prev,
                        next: step.why_index,
                    });
                }
            }
            previous = Some(step.why_index);
        }
        Ok(())
    }
}

impl RcaIncident {
    /// Minimum shape an incident needs before a narrative task is created.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.impact.validate()?;
        check_unit("incident", self.score)?;
        for (i, chain) in self.chains.iter().enumerate() {
            chain.validate().map_err(|e| ModelError::in_chain(i + 1, e))?;
        }
        Ok(())
    }
}
