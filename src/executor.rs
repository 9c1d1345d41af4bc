//! Shard execution.
//!
//! Runs one test-runner job per shard/device concurrently. Isolation is
//! per-device: a shard that hits an infrastructure error (device gone,
//! runner crash) is recorded as a failed shard and its siblings keep
//! running. There is no cross-shard cancellation; each job runs to its own
//! completion or timeout, and results are merged commutatively afterwards
//! so completion order never matters.

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::device::{DeviceService, ExecutionOptions};
use crate::results::{ShardFailure, ShardResult};
use crate::shard::ShardPlan;
use crate::suite::TestSuiteTarget;

/// Executes every shard in the plan, one concurrent job per device.
///
/// Each job exclusively owns its device handle and filter; the only shared
/// state is the result sink. Empty shards complete immediately without
/// touching their device. Returns completed results and per-shard
/// infrastructure failures, both sorted by shard index.
pub async fn execute(
    service: &dyn DeviceService,
    suite: &TestSuiteTarget,
    plan: &ShardPlan,
    options: &ExecutionOptions,
) -> (Vec<ShardResult>, Vec<ShardFailure>) {
    let results = Mutex::new(Vec::new());
    let failures = Mutex::new(Vec::new());

    // One scoped task per shard; the scope joins them all before returning.
    tokio_scoped::scope(|scope| {
        for shard in &plan.shards {
            let results = &results;
            let failures = &failures;

            scope.spawn(async move {
                if shard.is_empty() {
                    results
                        .lock()
                        .await
                        .push(ShardResult::empty(shard.index, shard.device.clone()));
                    return;
                }

                info!(
                    "Shard {} running {} test(s) on {}",
                    shard.index,
                    shard.tests.len(),
                    shard.device
                );

                match service
                    .run_filtered(&shard.device, suite, &shard.filter, shard.index, options)
                    .await
                {
                    Ok(result) => {
                        results.lock().await.push(result);
                    }
                    Err(e) => {
                        error!("Shard {} on {} failed: {}", shard.index, shard.device, e);
                        failures.lock().await.push(ShardFailure {
                            shard_index: shard.index,
                            device: shard.device.clone(),
                            tests: shard.tests.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            });
        }
    });

    let mut results = results.into_inner();
    let mut failures = failures.into_inner();
    results.sort_by_key(|r| r.shard_index);
    failures.sort_by_key(|f| f.shard_index);
    (results, failures)
}
