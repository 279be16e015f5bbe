//! Identifier resolution.
//!
//! Causal analysis reports services, components and KPIs by opaque UUID,
//! sometimes with a suffix glued on (`<uuid>-dep`). The resolver swaps each
//! identifier for its display name through an [`IdentifierLookup`], keeps the
//! suffix byte-for-byte, and records the identifier in
//! [`ResolvedField::source_id`]. Anything it cannot resolve is left exactly as
//! it was, so resolving twice is a no-op.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::LookupError;
use crate::field::ResolvedField;
use crate::incident::{RcaIncident, RcaStep};

const UUID: &str =
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";
const UUID_LEN: usize = 36;

/// Identifier at the start of a field; whatever follows is the suffix.
static LEADING_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{UUID}")).expect("identifier pattern"));

/// Identifier tokens embedded in free text, with an optional `-word` suffix.
static IDENTIFIER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b{UUID}(?:-[A-Za-z0-9_]+)?")).expect("identifier token pattern")
});

/// What a lookup knows about one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRecord {
    pub display_name: String,
    /// KPI definition, when the identifier names a KPI.
    pub formula: Option<String>,
}

impl LookupRecord {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            formula: None,
        }
    }
}

/// Source of display names for opaque identifiers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentifierLookup: Send + Sync {
    /// `Ok(None)` means the identifier is unknown.
    async fn lookup(&self, id: &str) -> Result<Option<LookupRecord>, LookupError>;
}

/// In-memory lookup table, loadable from a JSON object of `id -> name`.
#[derive(Debug, Clone, Default)]
pub struct MapLookup {
    entries: HashMap<String, LookupRecord>,
}

impl MapLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, record: LookupRecord) {
        self.entries.insert(id.into().to_ascii_lowercase(), record);
    }

    pub fn with(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.insert(id, LookupRecord::named(name));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, LookupError> {
        let names: HashMap<String, String> =
            serde_json::from_str(raw).map_err(|e| LookupError(e.to_string()))?;
        Ok(names
            .into_iter()
            .fold(Self::new(), |map, (id, name)| map.with(id, name)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LookupError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LookupError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }
}

#[async_trait]
impl IdentifierLookup for MapLookup {
    async fn lookup(&self, id: &str) -> Result<Option<LookupRecord>, LookupError> {
        Ok(self.entries.get(&id.to_ascii_lowercase()).cloned())
    }
}

/// True when `text` carries at least one identifier token.
pub fn contains_identifier(text: &str) -> bool {
    IDENTIFIER_TOKEN.is_match(text)
}

#[derive(Clone)]
pub struct IdentifierResolver {
    lookup: Arc<dyn IdentifierLookup>,
}

impl IdentifierResolver {
    pub fn new(lookup: Arc<dyn IdentifierLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve_field(&self, field: &ResolvedField) -> ResolvedField {
        self.pass().field(field).await.0
    }

    pub async fn resolve_text(&self, text: &str) -> String {
        self.pass().text(text).await.0
    }

    /// Resolve every name-bearing field of an incident. Lookups are shared
    /// across the whole incident, so each identifier is fetched once.
    pub async fn resolve_incident(&self, incident: &RcaIncident) -> RcaIncident {
        let mut pass = self.pass();
        let mut resolved = incident.clone();

        resolved.impact.impact_service = pass.field(&incident.impact.impact_service).await.0;
        resolved.impact.metric_name = pass.field(&incident.impact.metric_name).await.0;
        resolved.impact.summary = pass.text(&incident.impact.summary).await.0;

        for chain in &mut resolved.chains {
            for step in &mut chain.steps {
                pass.step(step).await;
            }
            chain.refresh_path();
        }
        for note in &mut resolved.notes {
            *note = pass.text(note).await.0;
        }
        resolved.derive_root_cause();

        debug!(
            identifiers = pass.memo.len(),
            resolved = pass.memo.values().filter(|r| r.is_some()).count(),
            "incident identifiers resolved"
        );
        resolved
    }

    fn pass(&self) -> Pass<'_> {
        Pass {
            lookup: self.lookup.as_ref(),
            memo: HashMap::new(),
        }
    }
}

struct Pass<'a> {
    lookup: &'a dyn IdentifierLookup,
    memo: HashMap<String, Option<LookupRecord>>,
}

impl Pass<'_> {
    async fn find(&mut self, id: &str) -> Option<LookupRecord> {
        if let Some(hit) = self.memo.get(id) {
            return hit.clone();
        }
        let found = match self.lookup.lookup(id).await {
            Ok(Some(record)) if !record.display_name.trim().is_empty() => Some(record),
            Ok(_) => None,
            Err(err) => {
                warn!(identifier = %id, error = %err, "identifier lookup failed, keeping raw token");
                None
            }
        };
        self.memo.insert(id.to_string(), found.clone());
        found
    }

    /// Returns the field and, when a lookup hit a KPI, its formula.
    async fn field(&mut self, field: &ResolvedField) -> (ResolvedField, Option<String>) {
        if field.is_resolved() {
            return (field.clone(), None);
        }
        let raw = field.display.as_str();

        // An unknown leading identifier still leaves later ones to resolve.
        if let Some(m) = LEADING_IDENTIFIER.find(raw) {
            let (id, suffix) = raw.split_at(m.end());
            if let Some(record) = self.find(id).await {
                return (
                    ResolvedField::resolved(format!("{}{}", record.display_name, suffix), id),
                    record.formula,
                );
            }
        }

        if contains_identifier(raw) {
            let (text, first) = self.text(raw).await;
            if let Some(id) = first {
                return (ResolvedField::resolved(text, id), None);
            }
        }
        (field.clone(), None)
    }

    /// Returns the rewritten text and the first identifier that resolved.
    async fn text(&mut self, text: &str) -> (String, Option<String>) {
        let spans: Vec<(usize, usize)> = IDENTIFIER_TOKEN
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        if spans.is_empty() {
            return (text.to_string(), None);
        }

        let mut out = String::with_capacity(text.len());
        let mut first = None;
        let mut last = 0;
        for (start, end) in spans {
            let token = &text[start..end];
            let (id, suffix) = token.split_at(UUID_LEN);
            out.push_str(&text[last..start]);
            match self.find(id).await {
                Some(record) => {
                    out.push_str(&record.display_name);
                    out.push_str(suffix);
                    first.get_or_insert_with(|| id.to_string());
                }
                None => out.push_str(token),
            }
            last = end;
        }
        out.push_str(&text[last..]);
        (out, first)
    }

    async fn step(&mut self, step: &mut RcaStep) {
        let (service, service_formula) = self.field(&step.service).await;
        let (component, component_formula) = self.field(&step.component).await;
        step.service = service;
        step.component = component;
        if step.formula.is_none() {
            step.formula = component_formula.or(service_formula);
        }
        step.summary = self.text(&step.summary).await.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{chain, context};
    use crate::incident::RcaChain;

    const PAYMENTS: &str = "3f2c1a9e-7b44-4d1e-9a0c-5e6f7a8b9c0d";
    const DB: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
    const UNKNOWN: &str = "00000000-1111-4222-8333-444444444444";

    fn resolver() -> IdentifierResolver {
        let lookup = MapLookup::new().with(PAYMENTS, "payments").with(DB, "orders-db");
        IdentifierResolver::new(Arc::new(lookup))
    }

    #[tokio::test]
    async fn plain_names_pass_through() {
        let field = resolver().resolve_field(&"checkout".into()).await;
        assert_eq!(field, ResolvedField::raw("checkout"));
    }

    #[tokio::test]
    async fn identifiers_resolve_and_keep_suffix() {
        let r = resolver();

        let bare = r.resolve_field(&PAYMENTS.into()).await;
        assert_eq!(bare, ResolvedField::resolved("payments", PAYMENTS));

        let suffixed = r.resolve_field(&format!("{PAYMENTS}-dep").into()).await;
        assert_eq!(suffixed.display, "payments-dep");
        assert_eq!(suffixed.source_id, PAYMENTS);

        let odd = r.resolve_field(&format!("{DB} (replica 2)").into()).await;
        assert_eq!(odd.display, "orders-db (replica 2)");
    }

    #[tokio::test]
    async fn unknown_identifiers_are_preserved() {
        let raw = format!("{UNKNOWN}-dep");
        let field = resolver().resolve_field(&raw.clone().into()).await;
        assert_eq!(field.display, raw);
        assert!(!field.is_resolved());
    }

    #[tokio::test]
    async fn lookup_errors_degrade_to_unresolved() {
        let mut lookup = MockIdentifierLookup::new();
        lookup
            .expect_lookup()
            .returning(|_| Err(LookupError("backend down".to_string())));
        let r = IdentifierResolver::new(Arc::new(lookup));

        let field = r.resolve_field(&PAYMENTS.into()).await;
        assert_eq!(field, ResolvedField::raw(PAYMENTS));
    }

    #[tokio::test]
    async fn free_text_rewrites_every_occurrence() {
        let text = format!(
            "latency on {PAYMENTS} followed pool exhaustion in {DB}-primary; {UNKNOWN} unaffected."
        );
        let out = resolver().resolve_text(&text).await;
        assert_eq!(
            out,
            format!("latency on payments followed pool exhaustion in orders-db-primary; {UNKNOWN} unaffected.")
        );
    }

    #[tokio::test]
    async fn embedded_identifier_fields_record_first_source() {
        let field = resolver().resolve_field(&format!("kpi:{DB}").into()).await;
        assert_eq!(field.display, "kpi:orders-db");
        assert_eq!(field.source_id, DB);
    }

    #[tokio::test]
    async fn unknown_leading_identifier_does_not_hide_later_ones() {
        let field = resolver()
            .resolve_field(&format!("{UNKNOWN} via {DB}").into())
            .await;
        assert_eq!(field.display, format!("{UNKNOWN} via orders-db"));
        assert_eq!(field.source_id, DB);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let r = resolver();
        let mut incident = RcaIncident::new(context());
        incident.impact.impact_service = PAYMENTS.into();
        incident.impact.summary = format!("{DB}-primary saturated");
        let dep = format!("{DB}-dep");
        incident
            .add_chain(chain(0.9, &[(1, PAYMENTS), (5, dep.as_str())]))
            .unwrap();

        let once = r.resolve_incident(&incident).await;
        let twice = r.resolve_incident(&once).await;

        assert_eq!(once, twice);
        assert_eq!(once.impact.impact_service.display, "payments");
        assert_eq!(once.chains[0].impact_path, vec!["payments", "orders-db-dep"]);
        assert_eq!(once.root_cause.as_ref().unwrap().service.display, "orders-db-dep");
        assert_eq!(once.root_cause.as_ref().unwrap().service.source_id, DB);
    }

    #[tokio::test]
    async fn each_identifier_is_looked_up_once_per_incident() {
        let mut lookup = MockIdentifierLookup::new();
        lookup
            .expect_lookup()
            .times(1)
            .returning(|_| Ok(Some(LookupRecord {
                display_name: "error-rate".to_string(),
                formula: Some("sum(rate(errors[1m]))".to_string()),
            })));
        let r = IdentifierResolver::new(Arc::new(lookup));

        let mut incident = RcaIncident::new(context());
        incident.impact.metric_name = PAYMENTS.into();
        let step = RcaStep::new(1, "checkout", 0.5).with_component(PAYMENTS);
        incident
            .add_chain(RcaChain::from_steps(0.5, vec![step]).unwrap())
            .unwrap();

        let out = r.resolve_incident(&incident).await;
        assert_eq!(out.impact.metric_name.display, "error-rate");
        assert_eq!(
            out.chains[0].steps[0].formula.as_deref(),
            Some("sum(rate(errors[1m]))")
        );
    }

    #[test]
    fn map_lookup_loads_json() {
        let map = MapLookup::from_json_str(&format!(r#"{{"{PAYMENTS}": "payments"}}"#)).unwrap();
        assert_eq!(map.len(), 1);
        assert!(MapLookup::from_json_str("[1, 2]").is_err());
    }
}
