//! # mend_patterns
//!
//! Pure classification of build output.
//!
//! - [`PatternRegistry`]: ordered error patterns, each mapping to ranked
//!   candidate fixes
//! - [`FixKind`]: the closed catalog of remediations and the commands they
//!   resolve to
//! - [`HeuristicDiagnoser`]: keyword fallback when no pattern matches
//!
//! Nothing in this crate performs I/O.

pub mod catalog;
pub mod error;
pub mod heuristic;
pub mod registry;
pub mod signature;

pub use catalog::{render_description, CandidateFix, FixKind, MatchGroups};
pub use error::{PatternError, PatternResult};
pub use heuristic::{diagnose, Diagnosis, HeuristicDiagnoser, HeuristicRule};
pub use registry::{ClassifiedError, ErrorPattern, Matcher, PatternMatch, PatternRegistry};
pub use signature::{ErrorCategory, ErrorSignature};
