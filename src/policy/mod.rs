//! Pure policy checks deciding whether a second factor applies.

pub mod audience;
pub mod ip;

pub use audience::{
    evaluate_audience, evaluate_audience_exclusion, AttributeOverrides, AudienceDecision,
    AudiencePattern, IncludeOverrides, OverrideMatch,
};
pub use ip::{check_ip_exclusion, matches_ip_exclusion, IpExclusion, IpRange};
