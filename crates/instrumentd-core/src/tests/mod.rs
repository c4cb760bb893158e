//! Test infrastructure for the instrumentation manager.
//!
//! Suites are organized by concern:
//!
//! | Suite | ID Range | Description |
//! |-------|----------|-------------|
//! | lifecycle | L001-L020 | Exec/exit handling, reporting, failed attempts |
//! | config_update | C001-C007 | Config group delivery and aggregation |
//! | requests | R001-R008 | Explicit instrument/uninstrument requests |
//! | shutdown | S001-S009 | Event loop, fail-fast, bounded close |
//! | properties | - | Table consistency under random interleavings |

pub mod config_update;
pub mod harness;
pub mod shutdown;

pub use harness::TestHarness;
pub use mocks::{MockFactory, MockInstrumentation, RecordingReporter};
