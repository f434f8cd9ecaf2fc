//! Test support: a deterministic scripted engine, no weights required.

mod mock_engine;

pub use mock_engine::{MockContext, MockModel, MockState};
