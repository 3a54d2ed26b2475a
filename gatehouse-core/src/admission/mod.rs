mod cache;
mod service;

pub use cache::{BlocklistCache, RuleKind};
pub use service::{AdmissionService, AdmissionStatus, NewRule, Verdict};
