//! Remote action executor
//!
//! Performs one leaf step against the live page and reports a structured
//! outcome:
//! - click, fill, dropdown, file and condition primitives
//! - bounded selector polling shared by all of them
//! - a [`DomPort`] seam so the same logic runs over CDP or an in-memory DOM
//!
//! Problems never escape as errors; they come back as failed [`ActionOutcome`]s.

pub mod errors;
pub mod locator;
pub mod ports;
mod primitives;
pub mod types;
pub mod waiting;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::*;
pub use ports::*;
pub use primitives::*;
pub use types::*;
pub use waiting::*;
