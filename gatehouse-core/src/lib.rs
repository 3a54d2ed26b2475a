mod admission;

pub use admission::{
    AdmissionService, AdmissionStatus, BlocklistCache, NewRule, RuleKind, Verdict,
};
