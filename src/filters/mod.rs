//! Filter expression evaluation and validation
//!
//! This module decides which chain events a subscription cares about. The
//! engine is pure and never errors; the validator rejects malformed filters
//! before they are accepted into a subscription.

pub mod engine;
pub mod validator;
pub mod value;

pub use engine::{evaluate, FilterExpression, FilterMap, FilterOperator, FilterSpec};
pub use validator::{validate_filter_expression, validate_filters};
