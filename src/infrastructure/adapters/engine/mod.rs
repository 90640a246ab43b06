//! Engine Adapter - 本地推理引擎实现

mod fake_engine;

pub use fake_engine::{EngineJournal, FakeEngine, FakeEngineConfig};
