//! Build unit execution.
//!
//! This module runs the units of a [`BuildDag`] in dependency order. It handles:
//! - wave-based ordering, with parallel execution inside a wave
//! - failure propagation: dependents of a failed unit are skipped, unrelated
//!   units keep building
//! - completion markers so a later run reuses units that already succeeded

pub mod conda;
pub mod marker;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::{BuildDag, BuildUnit, GraphError, UnitId};

pub use conda::{CondaBuilder, DebugSettings};
pub use types::{
  BuildError, ExecuteConfig, FailedDependency, RunReport, RunStatus, UnitArtifacts, default_parallelism,
};

/// Something that can build one unit into the output channel.
#[async_trait]
pub trait UnitBuilder: Send + Sync {
  async fn build(&self, unit: &BuildUnit, config: &ExecuteConfig) -> Result<UnitArtifacts, BuildError>;
}

/// Execute every unit of `dag`.
///
/// 1. Computes the parallel execution waves
/// 2. Skips units with a failed or skipped dependency
/// 3. Reuses units with a valid completion marker
/// 4. Builds the rest of the wave in parallel, bounded by `config.parallelism`
pub async fn execute_units(
  dag: &BuildDag,
  builder: Arc<dyn UnitBuilder>,
  config: &ExecuteConfig,
) -> Result<RunReport, GraphError> {
  info!(units = dag.unit_count(), "starting build execution");

  let waves = dag.unit_waves()?;
  info!(wave_count = waves.len(), "computed execution waves");

  let mut report = RunReport::default();
  // Unit that did not succeed -> the unit whose build failed.
  let mut failed_root: HashMap<UnitId, UnitId> = HashMap::new();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let config = Arc::new(config.clone());

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, units = wave.len(), "executing wave");

    let mut ready = Vec::new();
    for id in wave {
      let failed_dep = dag
        .dependencies(id)
        .into_iter()
        .find_map(|dep| failed_root.get(dep).map(|root| (dep.clone(), root.clone())));

      if let Some((dependency, root)) = failed_dep {
        let reason = FailedDependency {
          dependency,
          root: root.clone(),
        };
        warn!(unit = %id, reason = %reason, "skipping unit due to failed dependency");
        report.skipped.insert(id.clone(), reason);
        failed_root.insert(id.clone(), root);
        continue;
      }

      let Some(unit) = dag.unit(id) else {
        continue;
      };
      if config.reuse_completed
        && let Some(artifacts) = marker::read_marker(&config.output_folder, unit)
      {
        info!(unit = %id, "reusing unit built by an earlier run");
        report.reused.insert(id.clone(), artifacts);
        continue;
      }
      ready.push(unit.clone());
    }

    if ready.is_empty() {
      continue;
    }

    for (id, result) in execute_wave(ready, builder.clone(), config.clone(), semaphore.clone()).await {
      match result {
        Ok(artifacts) => {
          let unit = dag.unit(&id);
          if config.reuse_completed
            && !artifacts.packages.is_empty()
            && let Some(unit) = unit
            && let Err(source) = marker::write_marker(&config.output_folder, unit, &artifacts)
          {
            error!(unit = %id, error = %source, "failed to record completion");
            failed_root.insert(id.clone(), id.clone());
            report.failed.insert(id.clone(), BuildError::Io { unit: id, source });
            continue;
          }
          info!(unit = %id, packages = artifacts.packages.len(), "build succeeded");
          report.built.insert(id, artifacts);
        }
        Err(e) => {
          error!(unit = %id, error = %e, "build failed");
          failed_root.insert(id.clone(), id.clone());
          report.failed.insert(id, e);
        }
      }
    }
  }

  info!(
    built = report.built.len(),
    reused = report.reused.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    "build execution complete"
  );

  Ok(report)
}

/// Build one wave of units in parallel.
async fn execute_wave(
  units: Vec<BuildUnit>,
  builder: Arc<dyn UnitBuilder>,
  config: Arc<ExecuteConfig>,
  semaphore: Arc<Semaphore>,
) -> Vec<(UnitId, Result<UnitArtifacts, BuildError>)> {
  let mut join_set = JoinSet::new();
  let mut task_units = HashMap::new();

  for unit in units {
    let id = unit.id.clone();
    let builder = builder.clone();
    let config = config.clone();
    let semaphore = semaphore.clone();

    let handle = join_set.spawn(async move {
      let _permit = semaphore.acquire_owned().await;
      builder.build(&unit, &config).await
    });
    task_units.insert(handle.id(), id);
  }

  collect_join_results(join_set, task_units).await
}

/// Collect results from a JoinSet of unit tasks. A panicked task fails its own unit.
async fn collect_join_results(
  mut join_set: JoinSet<Result<UnitArtifacts, BuildError>>,
  mut task_units: HashMap<tokio::task::Id, UnitId>,
) -> Vec<(UnitId, Result<UnitArtifacts, BuildError>)> {
  let mut results = Vec::new();

  while let Some(join_result) = join_set.join_next_with_id().await {
    match join_result {
      Ok((task, result)) => {
        if let Some(id) = task_units.remove(&task) {
          results.push((id, result));
        }
      }
      Err(e) => {
        error!(error = %e, "build task panicked");
        if let Some(unit) = task_units.remove(&e.id()) {
          let message = e.to_string();
          results.push((unit.clone(), Err(BuildError::Aborted { unit, message })));
        }
      }
    }
  }

  results
}
