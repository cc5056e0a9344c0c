//! Interface tests for the engine contracts using Cucumber.
//!
//! Each feature file describes one contract in Gherkin; the step definitions
//! drive an in-process engine.
//!
//! ```bash
//! cargo test --test interfaces
//! ```

mod steps;

use cucumber::World;
use steps::consumer::ConsumerWorld;
use steps::kv::KvWorld;
use steps::stream::StreamWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running Stream Interface Tests ===\n");
    StreamWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/streams.feature")
        .await;

    println!("\n=== Running Consumer Interface Tests ===\n");
    ConsumerWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/consumers.feature")
        .await;

    println!("\n=== Running Key-Value Interface Tests ===\n");
    KvWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/key_value.feature")
        .await;
}
