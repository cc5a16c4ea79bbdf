//! Dependency-ordered execution of named async stages.
//!
//! A stage starts only after every stage it names as a dependency has
//! completed successfully, and it receives those stages' outputs. All stages
//! run cooperatively on the caller's task.
//!
//! A failing *critical* stage ends the run: in-flight stages are dropped,
//! nothing else starts and the failure becomes the run's terminal error. A
//! failing *detached* stage is recorded in [`GraphRun::failures`], its
//! dependents are skipped and the rest of the graph keeps going.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt as _};
use thiserror::Error;

pub type StageName = &'static str;

type StageFn<V, E> = Box<dyn FnOnce(StageInputs<V>) -> BoxFuture<'static, Result<V, E>> + Send>;

struct Stage<V, E> {
    name: StageName,
    deps: Vec<StageName>,
    critical: bool,
    run: StageFn<V, E>,
}

/// Outputs of a stage's dependencies, keyed by stage name.
#[derive(Debug)]
pub struct StageInputs<V> {
    values: HashMap<StageName, V>,
}

impl<V> StageInputs<V> {
    pub fn get(&self, name: StageName) -> Option<&V> {
        self.values.get(name)
    }

    pub fn take(&mut self, name: StageName) -> Option<V> {
        self.values.remove(name)
    }
}

#[derive(Debug, Error)]
pub enum GraphError<E: std::error::Error + 'static> {
    #[error("stage `{0}` is declared more than once")]
    DuplicateStage(StageName),
    #[error("stage `{stage}` depends on undeclared stage `{dependency}`")]
    UnknownDependency {
        stage: StageName,
        dependency: StageName,
    },
    #[error("stages can never become ready: {0:?}")]
    Unschedulable(Vec<StageName>),
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: E,
    },
    #[error("target stage `{0}` did not produce a value")]
    Unresolved(StageName),
}

#[derive(Debug)]
pub struct StageFailure<E> {
    pub stage: StageName,
    pub error: E,
}

/// Result of a run in which no critical stage failed.
#[derive(Debug)]
pub struct GraphRun<V, E> {
    /// Output of the target stage.
    pub value: V,
    /// Outputs of every other stage that completed.
    pub completed: HashMap<StageName, V>,
    /// Detached stages that failed, in completion order.
    pub failures: Vec<StageFailure<E>>,
    /// Stages that never ran because a detached dependency failed.
    pub skipped: Vec<StageName>,
}

pub struct TaskGraph<V, E> {
    stages: Vec<Stage<V, E>>,
}

impl<V, E> Default for TaskGraph<V, E> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<V, E> TaskGraph<V, E>
where
    V: Clone + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage whose failure aborts the whole run.
    pub fn stage<F, Fut>(&mut self, name: StageName, deps: &[StageName], run: F) -> &mut Self
    where
        F: FnOnce(StageInputs<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.push(name, deps, true, run)
    }

    /// Adds a stage whose failure is recorded without aborting the run.
    pub fn detached_stage<F, Fut>(
        &mut self,
        name: StageName,
        deps: &[StageName],
        run: F,
    ) -> &mut Self
    where
        F: FnOnce(StageInputs<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.push(name, deps, false, run)
    }

    fn push<F, Fut>(
        &mut self,
        name: StageName,
        deps: &[StageName],
        critical: bool,
        run: F,
    ) -> &mut Self
    where
        F: FnOnce(StageInputs<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.stages.push(Stage {
            name,
            deps: deps.to_vec(),
            critical,
            run: Box::new(move |inputs| run(inputs).boxed()),
        });
        self
    }

    fn validate(&self) -> Result<(), GraphError<E>> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name) {
                return Err(GraphError::DuplicateStage(stage.name));
            }
        }
        for stage in &self.stages {
            if let Some(dependency) = stage.deps.iter().find(|d| !names.contains(*d)) {
                return Err(GraphError::UnknownDependency {
                    stage: stage.name,
                    dependency: *dependency,
                });
            }
        }
        Ok(())
    }

    /// Runs every stage and resolves to the output of `target`.
    pub async fn run(self, target: StageName) -> Result<GraphRun<V, E>, GraphError<E>> {
        self.validate()?;

        let mut pending = self.stages;
        let mut completed: HashMap<StageName, V> = HashMap::new();
        let mut unavailable: HashSet<StageName> = HashSet::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            // Skips cascade, so keep scanning until nothing changes.
            loop {
                let mut progressed = false;
                let mut waiting = Vec::with_capacity(pending.len());

                for stage in pending {
                    if stage.deps.iter().any(|d| unavailable.contains(d)) {
                        tracing::debug!(stage = stage.name, "skipping stage");
                        unavailable.insert(stage.name);
                        skipped.push(stage.name);
                        progressed = true;
                    } else if stage.deps.iter().all(|d| completed.contains_key(d)) {
                        let values = stage
                            .deps
                            .iter()
                            .filter_map(|d| completed.get(d).map(|v| (*d, v.clone())))
                            .collect();
                        let name = stage.name;
                        let critical = stage.critical;
                        tracing::debug!(stage = name, "starting stage");
                        let fut = (stage.run)(StageInputs { values });
                        in_flight.push(fut.map(move |res| (name, critical, res)));
                        progressed = true;
                    } else {
                        waiting.push(stage);
                    }
                }

                pending = waiting;
                if !progressed {
                    break;
                }
            }

            let Some((name, critical, res)) = in_flight.next().await else {
                break;
            };

            match res {
                Ok(value) => {
                    tracing::debug!(stage = name, "stage completed");
                    completed.insert(name, value);
                }
                Err(error) if critical => {
                    tracing::warn!(stage = name, error = %error, "stage failed, aborting");
                    return Err(GraphError::Stage {
                        stage: name,
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::warn!(stage = name, error = %error, "detached stage failed");
                    unavailable.insert(name);
                    failures.push(StageFailure { stage: name, error });
                }
            }
        }

        if !pending.is_empty() {
            return Err(GraphError::Unschedulable(
                pending.iter().map(|s| s.name).collect(),
            ));
        }

        let value = completed
            .remove(target)
            .ok_or(GraphError::Unresolved(target))?;

        Ok(GraphRun {
            value,
            completed,
            failures,
            skipped,
        })
    }
}
