//! Replica Query - Reference Resolution and Evaluation
//!
//! Pure algorithms over `replica-core` types. The resolver decides which
//! entities a query depends on; the evaluator serves a query from replica
//! rows. Neither performs I/O.

pub mod eval;
pub mod resolve;

pub use eval::{compare_values, values_equal, Dataset, EvalResult, Evaluator};
pub use resolve::{RefSet, Resolver, DEFAULT_MAX_DEPTH};

#[cfg(test)]
mod test_model;
