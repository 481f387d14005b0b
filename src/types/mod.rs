//! Domain types for the SocTalk investigation pipeline.

pub mod alerts;
pub mod enums;
pub mod investigation;
pub mod observables;
pub mod state;
pub mod verdict;

pub use alerts::{Alert, AlertSource};
pub use enums::{
    EnrichmentVerdict, EvidenceStrength, HumanDecision, ImpactLevel, InvestigationStatus,
    ObservableType, Phase, Severity, Urgency, VerdictDecision,
};
pub use investigation::{
    Finding, Investigation, MispContext, MispEventContext, MispMatch, WarninglistHit,
};
pub use observables::{Enrichment, Observable};
pub use state::{SupervisorAction, SupervisorDecision, WorkflowState};
pub use verdict::Verdict;
