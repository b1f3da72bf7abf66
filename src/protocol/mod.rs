//! Wire-protocol response classification.
//!
//! The MOO server answers an evaluation request with one of a small set of
//! textual shapes: a success line, a compile-error line, or a multi-line
//! runtime traceback. This module turns accumulated response text into a
//! tagged [`EvalOutcome`] so tests can assert on the server's own errors as
//! first-class results instead of scraping strings.

mod classify;

pub use classify::{EvalOutcome, classify};
