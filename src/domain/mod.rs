//! Domain types for shadow comparisons
//!
//! Pure logic with no I/O: the structural response diff and the
//! per-request record built from it.

pub mod comparison;
pub mod shadow_result;

pub use comparison::{DiffReport, Difference, DifferenceKind, ResponseComparison, ResponseDiffer};
pub use shadow_result::ShadowTestResult;
