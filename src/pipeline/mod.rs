//! Pipeline orchestration: run state machine, diagnostics, cancellation
//!
//! ```text
//! DatasetRequest
//!     ↓
//! Pipeline::run()
//!     ↓
//! RESOLVING_VARIABLES → FETCHING → CROSSWALKING → AGGREGATING → DONE
//!     ↓ (invalid request / timeout / cancel)
//! FAILED
//! ```

pub mod cancel;
pub mod diagnostics;
pub mod orchestrator;

pub use cancel::CancelToken;
pub use diagnostics::Diagnostic;
pub use orchestrator::{DatasetRequest, Pipeline, ResultTable, RunState};
