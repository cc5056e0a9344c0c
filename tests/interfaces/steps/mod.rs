//! Cucumber step definitions for interface tests.

pub mod consumer;
pub mod kv;
pub mod stream;

use jetlog::config::EngineConfig;
use jetlog::{Engine, EngineError};

/// Engine with short sweep intervals.
pub fn test_engine() -> Engine {
    Engine::new(EngineConfig::for_test())
}

/// Compare an error's kind with the name used in feature files.
pub fn assert_kind(error: Option<&EngineError>, expected: &str) {
    let error = error.expect("expected the last operation to fail");
    assert_eq!(
        format!("{:?}", error.kind()),
        expected,
        "unexpected error: {error}"
    );
}

/// Parse a comma-separated list of sequences.
pub fn parse_seqs(list: &str) -> Vec<u64> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse().expect("sequence number"))
        .collect()
}
