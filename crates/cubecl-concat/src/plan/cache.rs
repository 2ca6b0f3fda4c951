//! Plan cache.

use std::collections::HashMap;

use crate::config::ConcatConfig;
use crate::device::DeviceInfo;
use crate::error::ConcatResult;
use crate::plan::{plan_concat_with_config, ConcatPlan, ConcatRequest};

/// Cache for concat plans of one device and configuration.
///
/// Planning is cheap but runs on every descriptor creation; failures are
/// cached too so rejected requests are not re-planned.
pub struct PlanCache<D> {
    device: D,
    config: ConcatConfig,
    plans: HashMap<ConcatRequest, ConcatResult<ConcatPlan>>,
}

impl<D: DeviceInfo> PlanCache<D> {
    /// Empty cache with the default configuration.
    pub fn new(device: D) -> Self {
        Self::with_config(device, ConcatConfig::default())
    }

    /// Empty cache planning with `config`.
    pub fn with_config(device: D, config: ConcatConfig) -> Self {
        Self {
            device,
            config,
            plans: HashMap::new(),
        }
    }

    /// Get cached plan or create new one.
    pub fn get_or_plan(&mut self, request: &ConcatRequest) -> ConcatResult<&ConcatPlan> {
        let Self {
            device,
            config,
            plans,
        } = self;
        plans
            .entry(request.clone())
            .or_insert_with(|| {
                log::trace!("Plan cache miss");
                plan_concat_with_config(request, &*device, config)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Drop the cached result for `request`.
    pub fn invalidate(&mut self, request: &ConcatRequest) -> bool {
        self.plans.remove(request).is_some()
    }

    /// Clear all cached plans.
    pub fn clear(&mut self) {
        self.plans.clear();
    }

    /// Number of cached results, failures included.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Device plans are made for.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Configuration plans are made with.
    pub fn config(&self) -> &ConcatConfig {
        &self.config
    }
}
