//! Benchmarks built into the `benchfork` binary.
//!
//! They make the binary usable without writing any code, and give forked
//! workers something real to run.

use crate::descriptor::Mode;
use crate::error::HarnessError;
use crate::executor::InvocationContext;
use crate::registry::{BenchmarkDefinition, BenchmarkRegistry};
use crate::results::TimeUnit;
use anyhow::{bail, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::hint::black_box;
use std::time::Duration;

/// Spin for roughly `tokens` units of CPU work
pub fn consume_cpu(tokens: u64) {
    let mut t = tokens;
    while black_box(t) > 0 {
        t -= 1;
    }
}

fn hash_bytes(len: usize) -> impl Fn(&InvocationContext) -> Result<()> + Send + Sync {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    move |_ctx: &InvocationContext| {
        let mut hasher = DefaultHasher::new();
        black_box(&data).hash(&mut hasher);
        black_box(hasher.finish());
        Ok(())
    }
}

fn failing(ctx: &InvocationContext) -> Result<()> {
    if ctx.kind == crate::results::IterationKind::Measurement {
        bail!("failing benchmark refused to run iteration {}", ctx.iteration);
    }
    Ok(())
}

/// Registry with every built-in benchmark
pub fn registry() -> Result<BenchmarkRegistry, HarnessError> {
    let mut registry = BenchmarkRegistry::new();

    registry.register(BenchmarkDefinition::new("baseline", |_| Ok(())))?;
    registry.register(BenchmarkDefinition::new("cpu_burn_small", |_| {
        consume_cpu(black_box(64));
        Ok(())
    }))?;
    registry.register(
        BenchmarkDefinition::new("cpu_burn_big", |_| {
            consume_cpu(black_box(4096));
            Ok(())
        })
        .mode(Mode::AverageTime)
        .time_unit(TimeUnit::Nanoseconds),
    )?;
    registry.register(BenchmarkDefinition::new("hash_64b", hash_bytes(64)))?;
    registry.register(
        BenchmarkDefinition::new("hash_4k", hash_bytes(4096))
            .mode(Mode::SampleTime)
            .time_unit(TimeUnit::Nanoseconds),
    )?;
    registry.register(
        BenchmarkDefinition::new("sleep_1ms", |_| {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        })
        .mode(Mode::SingleShot)
        .time_unit(TimeUnit::Milliseconds),
    )?;
    registry.register(BenchmarkDefinition::new("contended_hash", hash_bytes(256)).threads(2))?;
    registry.register(BenchmarkDefinition::new("failing", failing))?;

    Ok(registry)
}
