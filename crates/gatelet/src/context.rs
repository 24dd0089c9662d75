//! Recycle-safe context slots.
//!
//! Worker lanes are reused between units of work without any reset step.
//! Instead of clearing slot values, each lane carries a generation counter
//! advanced at the start of every unit; a slot remembers the generation
//! that wrote it and reads from later generations see no value. One counter
//! and one set of slots belong to one lane; sharing them across
//! concurrently running units would leak values between them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Generation counter for one worker lane.
///
/// Starts at zero so writes made before the first unit of work are already
/// stale by the time that unit runs.
#[derive(Debug, Default)]
pub struct RecycleCounter {
    generation: AtomicU64,
}

impl RecycleCounter {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Mark the lane recycled. Returns the new generation.
    pub fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// The lane generation captured when a unit of work starts.
///
/// Passed explicitly to every slot access so staleness is decided against
/// the unit that is actually asking, not whatever the lane counter says by
/// the time the access runs.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    generation: u64,
}

impl RequestContext {
    pub fn capture(counter: &RecycleCounter) -> Self {
        Self {
            generation: counter.current(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context slot {slot} has no value for the current unit of work")]
    Stale { slot: &'static str },
}

struct SlotState<T> {
    value: Option<T>,
    update_generation: u64,
}

/// One named context value, safe across lane recycling.
///
/// A value written during generation `g` is visible to generation `g` and
/// to no later one. There is no way to clear a slot; recycling the lane is
/// what retires its values.
pub struct ContextSlot<T> {
    name: &'static str,
    state: Mutex<SlotState<T>>,
}

impl<T: Clone> ContextSlot<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState {
                value: None,
                update_generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read the slot for the given unit of work.
    pub fn get(&self, ctx: RequestContext) -> Result<T, ContextError> {
        let recycles = ctx.generation();
        let mut state = self.lock_state();
        if recycles > state.update_generation {
            state.update_generation = recycles;
        }
        if recycles < state.update_generation
            && let Some(value) = &state.value
        {
            return Ok(value.clone());
        }
        Err(ContextError::Stale { slot: self.name })
    }

    /// Read the slot, falling back to `default` when it is stale or unset.
    pub fn get_or(&self, ctx: RequestContext, default: T) -> T {
        self.get(ctx).unwrap_or(default)
    }

    /// Write the slot for the given unit of work.
    pub fn set(&self, ctx: RequestContext, value: T) {
        let recycles = ctx.generation();
        let mut state = self.lock_state();
        if recycles > state.update_generation {
            state.update_generation = recycles;
        }
        if state.update_generation == recycles {
            state.update_generation = recycles + 1;
        }
        state.value = Some(value);
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
