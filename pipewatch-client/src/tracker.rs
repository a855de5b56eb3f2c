//! Resource trackers
//!
//! A `ResourceTracker` follows one named pipeline run, task run or pod. Every
//! query is answered from a fresh snapshot; nothing is cached between calls.

use pipewatch_core::{
    ChildReference, Condition, ConditionStatus, LifecycleState, PipelineRunKind, PodKind,
    ResourceKind, ResourceSnapshot, TaskRunKind,
};
use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::watch::{WatchChannel, WatchItem};
use crate::PipelineClient;

/// Tracker for one resource of kind `K`
#[derive(Debug, Clone)]
pub struct ResourceTracker<K: ResourceKind> {
    pub(crate) client: PipelineClient,
    name: String,
    _kind: PhantomData<K>,
}

pub type PipelineRun = ResourceTracker<PipelineRunKind>;
pub type TaskRun = ResourceTracker<TaskRunKind>;
pub type Pod = ResourceTracker<PodKind>;

impl<K: ResourceKind> ResourceTracker<K> {
    pub fn new(client: PipelineClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            _kind: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Always-fresh snapshot; `None` when the resource does not exist
    pub async fn snapshot(&self) -> Result<Option<ResourceSnapshot>> {
        self.client.get_resource::<K>(&self.name).await
    }

    /// Opens a new watch over this resource
    pub fn watch(&self) -> WatchChannel<K> {
        self.client.watch::<K>(self.name.clone())
    }

    /// Waits until the resource is running or has reached an end state.
    ///
    /// Returns `None` if the resource turns out not to exist, or if the watch
    /// is exhausted before the resource starts.
    pub async fn wait_for_start(&self) -> Result<Option<ResourceSnapshot>> {
        info!("Waiting for {} '{}' to start", K::KIND, self.name);

        let mut channel = self.watch();
        while let Some(item) = channel.next().await? {
            let snapshot = match item {
                WatchItem::Snapshot(snapshot) => snapshot,
                WatchItem::Absent | WatchItem::Unknown => match self.snapshot().await {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => {
                        info!("{} '{}' does not exist", K::KIND, self.name);
                        return Ok(None);
                    }
                    Err(e) if e.is_transient() => continue,
                    Err(e) => return Err(e),
                },
            };

            match snapshot.condition() {
                Some(condition) if condition.has_started() => return Ok(Some(snapshot)),
                Some(condition) => debug!(
                    "Waiting for {} '{}', current status {}, reason {}",
                    K::KIND,
                    self.name,
                    condition.status,
                    condition.reason
                ),
                None => debug!("{} '{}' does not have any status", K::KIND, self.name),
            }
        }

        warn!(
            "Stopped waiting for {} '{}' to start, watch exhausted",
            K::KIND,
            self.name
        );
        Ok(None)
    }

    /// Whether the resource is past its in-progress phase.
    ///
    /// A resource without any reported status is not finished; a resource
    /// that no longer exists is. Use `snapshot()` to tell "gone" apart from
    /// "finished".
    pub async fn has_finished(&self) -> Result<bool> {
        let Some(snapshot) = self.snapshot().await? else {
            return Ok(true);
        };
        Ok(self.finished(&snapshot))
    }

    fn finished(&self, snapshot: &ResourceSnapshot) -> bool {
        snapshot
            .condition()
            .is_some_and(|condition| !self.client.config().policy.is_unfinished(condition))
    }

    /// Polls until `has_finished()`, bounded by the configured wait budget.
    ///
    /// Returns the final snapshot, or `None` if the resource vanished.
    pub async fn wait_for_finish(&self) -> Result<Option<ResourceSnapshot>> {
        let settings = &self.client.config().wait;
        let deadline = tokio::time::Instant::now() + settings.timeout;
        info!("Waiting for {} '{}' to finish", K::KIND, self.name);

        loop {
            match self.snapshot().await? {
                None => return Ok(None),
                Some(snapshot) if self.finished(&snapshot) => return Ok(Some(snapshot)),
                Some(_) => {}
            }

            if tokio::time::Instant::now() + settings.poll_interval > deadline {
                return Err(ClientError::Timeout(format!(
                    "{} '{}' did not finish within {}s",
                    K::KIND,
                    self.name,
                    settings.timeout.as_secs()
                )));
            }

            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    pub async fn status_status(&self) -> Result<Option<ConditionStatus>> {
        Ok(self
            .snapshot()
            .await?
            .and_then(|s| s.condition().map(|c| c.status)))
    }

    pub async fn status_reason(&self) -> Result<Option<String>> {
        Ok(self
            .snapshot()
            .await?
            .and_then(|s| s.condition().map(|c| c.reason.clone())))
    }

    pub async fn lifecycle(&self) -> Result<LifecycleState> {
        let snapshot = self.snapshot().await?;
        Ok(self
            .client
            .config()
            .policy
            .lifecycle(snapshot.as_ref().and_then(ResourceSnapshot::condition)))
    }

    pub async fn has_succeeded(&self) -> Result<bool> {
        let reason = self.status_reason().await?;
        Ok(reason.is_some_and(|reason| self.client.config().policy.is_succeeded(&reason)))
    }

    pub async fn was_cancelled(&self) -> Result<bool> {
        let reason = self.status_reason().await?;
        Ok(reason.is_some_and(|reason| self.client.config().policy.is_cancelled(&reason)))
    }

    pub async fn labels(&self) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.snapshot().await?.map(|s| s.labels))
    }

    pub async fn annotations(&self) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.snapshot().await?.map(|s| s.annotations))
    }
}

// =============================================================================
// Pipeline runs
// =============================================================================

impl ResourceTracker<PipelineRunKind> {
    /// Lazily discovers child task runs as they appear
    pub fn watch_new_children(&self) -> ChildWatch {
        ChildWatch::new(self.watch())
    }

    /// Task runs currently referenced by the pipeline run, in backend order
    pub async fn child_task_runs(&self) -> Result<Vec<ChildReference>> {
        Ok(self
            .snapshot()
            .await?
            .map(|s| s.children_of::<TaskRunKind>().cloned().collect())
            .unwrap_or_default())
    }

    /// Tracker for a child task run
    pub fn task_run(&self, child: &ChildReference) -> TaskRun {
        self.client.task_run(child.name.clone())
    }

    /// Evaluates `predicate` over the first condition of every child task
    /// run. Task runs without a reported condition, or that no longer exist,
    /// never match.
    pub async fn any_task_in_state<F>(&self, predicate: F) -> Result<bool>
    where
        F: Fn(&Condition) -> bool,
    {
        for child in self.child_task_runs().await? {
            let Some(snapshot) = self.task_run(&child).snapshot().await? else {
                continue;
            };
            if snapshot.condition().is_some_and(&predicate) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A task finished with `False`, was not cancelled, and has a completion time
    pub async fn any_task_failed(&self) -> Result<bool> {
        let policy = self.client.config().policy.clone();
        self.any_task_in_state(|c| policy.is_failed_task(c)).await
    }

    pub async fn any_task_cancelled(&self) -> Result<bool> {
        let policy = self.client.config().policy.clone();
        self.any_task_in_state(|c| policy.is_cancelled_task(c)).await
    }
}

/// Batches of newly discovered task runs of one pipeline run
///
/// A task run name is yielded at most once. The sequence ends once the
/// pipeline run reaches a terminal status, disappears, or the watch is
/// exhausted.
pub struct ChildWatch {
    channel: WatchChannel<PipelineRunKind>,
    seen: HashSet<String>,
    finished: bool,
}

impl ChildWatch {
    fn new(channel: WatchChannel<PipelineRunKind>) -> Self {
        Self {
            channel,
            seen: HashSet::new(),
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Vec<ChildReference>>> {
        while !self.finished {
            let snapshot = match self.channel.next().await? {
                Some(WatchItem::Snapshot(snapshot)) => snapshot,
                Some(WatchItem::Unknown) => continue,
                Some(WatchItem::Absent) | None => {
                    self.finished = true;
                    break;
                }
            };

            let delta: Vec<ChildReference> = snapshot
                .children_of::<TaskRunKind>()
                .filter(|child| self.seen.insert(child.name.clone()))
                .cloned()
                .collect();

            if snapshot.is_terminal() {
                self.finished = true;
            }

            if !delta.is_empty() {
                debug!("discovered {} new task run(s)", delta.len());
                return Ok(Some(delta));
            }
        }

        Ok(None)
    }
}
