//! Process-wide registry mapping handle ids to instances.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::info;
use parking_lot::Mutex;

use crate::common::error::{BoxError, BoxResult};
use crate::common::ids::{IdSequence, InstanceId};
use crate::common::log::{self as box_log, instance_target};

use super::domain::Instance;

static IDS: IdSequence = IdSequence::new();

fn registry() -> &'static Mutex<HashMap<u64, Arc<Instance>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Arc<Instance>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Allocate a fresh idle instance. Ids start at 1 and are never reused.
pub fn create() -> BoxResult<InstanceId> {
    box_log::init();
    let id = IDS
        .next()
        .map(InstanceId::new)
        .ok_or_else(|| BoxError::internal("instance id space exhausted"))?;

    box_log::register(id);
    registry().lock().insert(id.raw(), Arc::new(Instance::new(id)));
    info!(target: instance_target(id).as_str(), "instance created");
    Ok(id)
}

pub fn get(id: InstanceId) -> BoxResult<Arc<Instance>> {
    registry()
        .lock()
        .get(&id.raw())
        .cloned()
        .ok_or(BoxError::InvalidHandle)
}

/// Remove an instance, stopping it first if needed.
pub fn destroy(id: InstanceId) -> BoxResult<()> {
    let instance = registry()
        .lock()
        .remove(&id.raw())
        .ok_or(BoxError::InvalidHandle)?;

    instance.shutdown();
    info!(target: instance_target(id).as_str(), "instance destroyed");
    box_log::unregister(id);
    Ok(())
}
