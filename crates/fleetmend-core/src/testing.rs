//! In-memory compute and metrics doubles.
//!
//! Enabled by the `testing` feature. Every call is recorded so tests can
//! assert on exactly which control-plane operations were issued.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::provider::{ComputeControlPlane, MetricsProvider, ProviderError, ProviderFuture};
use crate::types::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A control-plane operation observed by [`FakeCompute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCall {
    DescribeRunning { next_token: Option<String> },
    Describe(Vec<InstanceId>),
    ForceStop(Vec<InstanceId>),
    Start(Vec<InstanceId>),
    Reboot(Vec<InstanceId>),
}

#[derive(Debug, Clone)]
struct FakeInstance {
    state: InstanceState,
    tags: HashMap<String, String>,
}

#[derive(Default)]
struct ComputeInner {
    instances: BTreeMap<InstanceId, FakeInstance>,
    calls: Vec<ComputeCall>,
    failing_stop: HashSet<InstanceId>,
    failing_start: HashSet<InstanceId>,
    failing_reboot: bool,
    failing_describe: bool,
}

/// Fake compute control plane holding instance states in memory.
#[derive(Default)]
pub struct FakeCompute {
    inner: Mutex<ComputeInner>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance carrying a single tag.
    pub fn add_instance(&self, id: &str, state: InstanceState, tag_key: &str, tag_value: &str) {
        let mut tags = HashMap::new();
        tags.insert(tag_key.to_string(), tag_value.to_string());
        lock(&self.inner)
            .instances
            .insert(id.to_string(), FakeInstance { state, tags });
    }

    pub fn set_state(&self, id: &str, state: InstanceState) {
        if let Some(inst) = lock(&self.inner).instances.get_mut(id) {
            inst.state = state;
        }
    }

    pub fn state_of(&self, id: &str) -> Option<InstanceState> {
        lock(&self.inner).instances.get(id).map(|i| i.state)
    }

    pub fn fail_stop_for(&self, id: &str) {
        lock(&self.inner).failing_stop.insert(id.to_string());
    }

    pub fn clear_stop_failure(&self, id: &str) {
        lock(&self.inner).failing_stop.remove(id);
    }

    pub fn fail_start_for(&self, id: &str) {
        lock(&self.inner).failing_start.insert(id.to_string());
    }

    pub fn clear_start_failure(&self, id: &str) {
        lock(&self.inner).failing_start.remove(id);
    }

    pub fn fail_reboot(&self) {
        lock(&self.inner).failing_reboot = true;
    }

    pub fn fail_describe(&self) {
        lock(&self.inner).failing_describe = true;
    }

    pub fn calls(&self) -> Vec<ComputeCall> {
        lock(&self.inner).calls.clone()
    }

    /// Every id passed to a force-stop call, in call order.
    pub fn stopped_ids(&self) -> Vec<InstanceId> {
        self.flatten(|c| match c {
            ComputeCall::ForceStop(ids) => Some(ids),
            _ => None,
        })
    }

    pub fn started_ids(&self) -> Vec<InstanceId> {
        self.flatten(|c| match c {
            ComputeCall::Start(ids) => Some(ids),
            _ => None,
        })
    }

    pub fn rebooted_ids(&self) -> Vec<InstanceId> {
        self.flatten(|c| match c {
            ComputeCall::Reboot(ids) => Some(ids),
            _ => None,
        })
    }

    fn flatten(&self, pick: impl Fn(&ComputeCall) -> Option<&Vec<InstanceId>>) -> Vec<InstanceId> {
        lock(&self.inner)
            .calls
            .iter()
            .filter_map(|c| pick(c).cloned())
            .flatten()
            .collect()
    }

    fn transition(
        &self,
        ids: &[InstanceId],
        call: ComputeCall,
        failing: impl Fn(&ComputeInner, &str) -> bool,
        next: Option<InstanceState>,
    ) -> Result<(), ProviderError> {
        let mut inner = lock(&self.inner);
        inner.calls.push(call);
        if let Some(id) = ids.iter().find(|id| failing(&inner, id)) {
            return Err(ProviderError::Api {
                status: 500,
                message: format!("injected failure for {id}"),
            });
        }
        if let Some(state) = next {
            for id in ids {
                if let Some(inst) = inner.instances.get_mut(id) {
                    inst.state = state;
                }
            }
        }
        Ok(())
    }
}

impl ComputeControlPlane for FakeCompute {
    fn describe_running_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
        next_token: Option<&'a str>,
    ) -> ProviderFuture<'a, InstancePage> {
        let result = (|| {
            let mut inner = lock(&self.inner);
            inner.calls.push(ComputeCall::DescribeRunning {
                next_token: next_token.map(str::to_string),
            });
            if inner.failing_describe {
                return Err(ProviderError::Transport("injected describe failure".into()));
            }

            let offset = match next_token {
                Some(t) => t
                    .parse::<usize>()
                    .map_err(|e| ProviderError::Api { status: 400, message: e.to_string() })?,
                None => 0,
            };
            let matching: Vec<InstanceSummary> = inner
                .instances
                .iter()
                .filter(|(_, i)| {
                    i.state == InstanceState::Running
                        && i.tags.get(&filter.tag_key) == Some(&filter.tag_value)
                })
                .map(|(id, i)| InstanceSummary { id: id.clone(), state: i.state })
                .collect();

            let page_size = filter.page_size.max(1) as usize;
            let end = (offset + page_size).min(matching.len());
            let instances = matching.get(offset..end).unwrap_or_default().to_vec();
            let next_token = (end < matching.len()).then(|| end.to_string());
            Ok(InstancePage { instances, next_token })
        })();
        Box::pin(std::future::ready(result))
    }

    fn describe_instances<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, Vec<InstanceSummary>> {
        let result = {
            let mut inner = lock(&self.inner);
            inner.calls.push(ComputeCall::Describe(ids.to_vec()));
            if inner.failing_describe {
                Err(ProviderError::Transport("injected describe failure".into()))
            } else {
                Ok(ids
                    .iter()
                    .filter_map(|id| {
                        inner
                            .instances
                            .get(id)
                            .map(|i| InstanceSummary { id: id.clone(), state: i.state })
                    })
                    .collect())
            }
        };
        Box::pin(std::future::ready(result))
    }

    fn force_stop<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        let result = self.transition(
            ids,
            ComputeCall::ForceStop(ids.to_vec()),
            |inner, id| inner.failing_stop.contains(id),
            Some(InstanceState::Stopped),
        );
        Box::pin(std::future::ready(result))
    }

    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        let result = self.transition(
            ids,
            ComputeCall::Start(ids.to_vec()),
            |inner, id| inner.failing_start.contains(id),
            Some(InstanceState::Running),
        );
        Box::pin(std::future::ready(result))
    }

    fn reboot<'a>(&'a self, ids: &'a [InstanceId]) -> ProviderFuture<'a, ()> {
        let result = self.transition(
            ids,
            ComputeCall::Reboot(ids.to_vec()),
            |inner, _| inner.failing_reboot,
            None,
        );
        Box::pin(std::future::ready(result))
    }
}

#[derive(Default)]
struct MetricsInner {
    series: HashMap<(InstanceId, String), Vec<f64>>,
    failing: HashSet<(InstanceId, String)>,
    queries: Vec<SeriesQuery>,
}

/// Fake metrics provider serving canned series per (instance, metric).
///
/// Unset series return an empty vector, i.e. a successful query with no data.
#[derive(Default)]
pub struct FakeMetrics {
    inner: Mutex<MetricsInner>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_series(&self, id: &str, metric: &str, values: Vec<f64>) {
        lock(&self.inner)
            .series
            .insert((id.to_string(), metric.to_string()), values);
    }

    pub fn fail_query(&self, id: &str, metric: &str) {
        lock(&self.inner)
            .failing
            .insert((id.to_string(), metric.to_string()));
    }

    pub fn queries(&self) -> Vec<SeriesQuery> {
        lock(&self.inner).queries.clone()
    }
}

impl MetricsProvider for FakeMetrics {
    fn query_time_series<'a>(&'a self, query: &'a SeriesQuery) -> ProviderFuture<'a, Vec<f64>> {
        let result = {
            let mut inner = lock(&self.inner);
            inner.queries.push(query.clone());
            let key = (query.instance_id.clone(), query.metric.clone());
            if inner.failing.contains(&key) {
                Err(ProviderError::Timeout(5000))
            } else {
                let mut values = inner.series.get(&key).cloned().unwrap_or_default();
                values.truncate(query.max_points as usize);
                Ok(values)
            }
        };
        Box::pin(std::future::ready(result))
    }
}
