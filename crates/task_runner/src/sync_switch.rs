use std::sync::{PoisonError, RwLock};

/// Boolean switch whose readers run while the value is held stable.
///
/// Used for the GPU-disabled state: the rasterizer executes its drawing path
/// under the read side, and toggling the switch waits for in-flight readers.
#[derive(Debug, Default)]
pub struct SyncSwitch {
    value: RwLock<bool>,
}

impl SyncSwitch {
    pub fn new(value: bool) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    pub fn execute<R>(&self, if_true: impl FnOnce() -> R, if_false: impl FnOnce() -> R) -> R {
        let value = self.value.read().unwrap_or_else(PoisonError::into_inner);
        if *value { if_true() } else { if_false() }
    }

    pub fn set_switch_value(&self, value: bool) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn value(&self) -> bool {
        *self.value.read().unwrap_or_else(PoisonError::into_inner)
    }
}
