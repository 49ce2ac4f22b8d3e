//! Fuzz target for whole-session convergence
//!
//! # Strategy
//!
//! - Arbitrary operation sequences against a full world: server, replicas
//!   and encoded per-link FIFOs with seeded interleaving
//!
//! # Invariants
//!
//! - NEVER panic, NEVER report an error for well-formed traffic
//! - With unbounded server history the only resets are the requested ones
//! - After the links drain, every replica matches the server

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lockstep_harness::{Operation, SimWorld, WorldConfig};

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    syn_interval: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let config = WorldConfig {
        seed: input.seed,
        syn_interval: u64::from(input.syn_interval % 8),
        ..WorldConfig::default()
    };
    let mut world = SimWorld::new(config);

    for op in &input.operations {
        if let Err(e) = world.apply(op) {
            panic!("{op:?} failed: {e}");
        }
    }
    if let Err(e) = world.quiesce() {
        panic!("quiesce failed: {e}");
    }

    let stats = world.stats();
    assert!(stats.resets <= stats.reset_requests, "{stats:?}");
    if let Err(divergence) = world.check_convergence() {
        panic!("{divergence:?}");
    }
});
