//! Print what the collectors report on this machine, without any network.
//!
//! Run: `cargo run --example collect_facts`

use hostagent_core::hashing::inventory_hash;
use hostagent_core::{FactsSource, MetricsSampler, SystemFacts};

fn main() {
    let facts = SystemFacts::default();

    let full = facts.full_facts();
    println!("{}", serde_json::to_string_pretty(&full).unwrap_or_default());
    println!("\ninventory hash: {}", inventory_hash(&full));

    let sample = facts.sample();
    println!("\n{}", serde_json::to_string_pretty(&sample).unwrap_or_default());
}
