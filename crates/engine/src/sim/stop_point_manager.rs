//! Handle-keyed registry of stop points.
//!
//! The manager listens for new-instruction events only while it holds at
//! least one stop point. On each event it sweeps every point, asks the
//! controller to stop when one fires, and remembers which points caused
//! the stop for the cycle in which it happened.
//!
//! The registry is borrowed for the whole sweep. Changing stop points from
//! inside an evaluator or condition therefore fails with
//! [`SimError::SimulationExecution`]; the read-only accessors must not be
//! called from there at all.

use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, info};

use super::controller::StopReason;
use super::events::{
    EventBus, EventCode, EventContext, Listener, SharedListener, SimulationEvent,
};
use super::instruction_memory::InstructionMemory;
use super::stop_point::{Condition, ExpressionEvaluator, StopPoint, SymbolEvaluator};
use crate::common::{ClockCycleCount, SimError, SimulationClock};

/// Identifier of a registered stop point.
///
/// Handles increase strictly and are never reissued, so a stale handle
/// fails lookup instead of naming another point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StopPointHandle(u32);

impl StopPointHandle {
    /// Returns the numeric handle.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StopPointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Registry {
    this: Weak<RefCell<Self>>,
    events: EventBus,
    clock: SimulationClock,
    evaluator: Box<dyn ExpressionEvaluator>,
    points: BTreeMap<StopPointHandle, StopPoint>,
    next_handle: u32,
    subscribed: bool,
    stop_causing: Vec<StopPointHandle>,
    last_stop: Option<(u64, ClockCycleCount)>,
}

impl Registry {
    fn listener(&self) -> Option<SharedListener> {
        self.this.upgrade().map(|rc| rc as SharedListener)
    }

    fn update_subscription(&mut self) {
        let wanted = !self.points.is_empty();
        if wanted == self.subscribed {
            return;
        }
        let Some(listener) = self.listener() else {
            return;
        };
        if wanted {
            self.events
                .register_listener(EventCode::NewInstruction, listener);
            debug!("stop points subscribed to new-instruction events");
        } else {
            let _ = self
                .events
                .unregister_listener(EventCode::NewInstruction, &listener);
            debug!("stop points unsubscribed from new-instruction events");
        }
        self.subscribed = wanted;
    }

    fn clear_stop_record(&mut self) {
        self.stop_causing.clear();
        self.last_stop = None;
    }

    fn point_mut(&mut self, handle: StopPointHandle) -> Result<&mut StopPoint, SimError> {
        self.points
            .get_mut(&handle)
            .ok_or_else(|| SimError::not_found("stop point", handle.to_string()))
    }

    /// Runs the firing protocol for the instruction the view points at.
    fn sweep(&mut self, ctx: &mut EventContext<'_>) {
        let view = ctx.view();
        let mut fired = Vec::new();
        let mut doomed = Vec::new();

        for (&handle, point) in &mut self.points {
            if !point.is_enabled() || !point.is_triggered(view, self.evaluator.as_mut()) {
                continue;
            }
            let condition_ok = point.is_condition_ok(view, self.evaluator.as_mut());
            if point.ignore_count() == 0 && condition_ok {
                debug!(%handle, point = %point, pc = view.program_counter(), "stop point hit");
                fired.push(handle);
                if point.is_disabled_after_trigger() {
                    point.set_enabled(false);
                }
                if point.is_deleted_after_trigger() {
                    doomed.push(handle);
                }
            } else if condition_ok {
                point.decrement_ignore_count();
            }
        }

        if !fired.is_empty() {
            ctx.request_stop(StopReason::Breakpoint);
            self.stop_causing = fired;
            self.last_stop = Some((self.clock.epoch(), view.cycle_count()));
        }
        for handle in doomed {
            let _ = self.points.remove(&handle);
        }
        self.update_subscription();
    }
}

impl Listener for Registry {
    fn handle_event(&mut self, event: &SimulationEvent<'_>, ctx: &mut EventContext<'_>) {
        if let SimulationEvent::NewInstruction { .. } = event {
            self.sweep(ctx);
        }
    }
}

/// Shared handle to the stop point registry of a session.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct StopPointManager {
    inner: Rc<RefCell<Registry>>,
}

impl fmt::Debug for StopPointManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.borrow();
        f.debug_struct("StopPointManager")
            .field("points", &registry.points)
            .field("next_handle", &registry.next_handle)
            .field("subscribed", &registry.subscribed)
            .finish_non_exhaustive()
    }
}

impl StopPointManager {
    /// Creates an empty manager using [`SymbolEvaluator`].
    ///
    /// # Arguments
    ///
    /// * `events` - Bus the manager subscribes to while it holds stop points.
    /// * `clock` - Cycle counter used to expire stop-causing records.
    pub fn new(events: EventBus, clock: SimulationClock) -> Self {
        Self::with_evaluator(events, clock, Box::new(SymbolEvaluator))
    }

    /// Creates an empty manager evaluating expressions with `evaluator`.
    pub fn with_evaluator(
        events: EventBus,
        clock: SimulationClock,
        evaluator: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(Registry {
                this: this.clone(),
                events,
                clock,
                evaluator,
                points: BTreeMap::new(),
                next_handle: 1,
                subscribed: false,
                stop_causing: Vec::new(),
                last_stop: None,
            })
        });
        Self { inner }
    }

    fn registry_mut(&self) -> Result<RefMut<'_, Registry>, SimError> {
        self.inner.try_borrow_mut().map_err(|_| {
            SimError::SimulationExecution(
                "stop points cannot be changed while they are being evaluated".to_string(),
            )
        })
    }

    /// Replaces the expression evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn set_evaluator(&self, evaluator: Box<dyn ExpressionEvaluator>) -> Result<(), SimError> {
        self.registry_mut()?.evaluator = evaluator;
        Ok(())
    }

    /// Follows the cycle counter of a newly loaded controller.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn attach_clock(&self, clock: SimulationClock) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        registry.clock = clock;
        registry.clear_stop_record();
        Ok(())
    }

    /// Forgets run history after the controller rewinds.
    ///
    /// Watch caches and the stop-causing record are cleared, so a watch
    /// compares against values of the new run only and no stop of the
    /// previous run is reported again.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn rewind(&self) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        for point in registry.points.values_mut() {
            point.reset_cache();
        }
        registry.clear_stop_record();
        debug!(points = registry.points.len(), "stop point history cleared");
        Ok(())
    }

    /// Registers a copy of `point`, enabled, and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn add(&self, point: &StopPoint) -> Result<StopPointHandle, SimError> {
        let mut registry = self.registry_mut()?;
        let handle = StopPointHandle(registry.next_handle);
        registry.next_handle += 1;
        let mut copy = point.clone();
        copy.set_enabled(true);
        debug!(%handle, point = %copy, "stop point added");
        let _ = registry.points.insert(handle, copy);
        registry.update_subscription();
        Ok(handle)
    }

    /// Deletes a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn delete(&self, handle: StopPointHandle) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        if registry.points.remove(&handle).is_none() {
            return Err(SimError::not_found("stop point", handle.to_string()));
        }
        registry.update_subscription();
        Ok(())
    }

    /// Deletes every stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn delete_all(&self) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        registry.points.clear();
        registry.update_subscription();
        Ok(())
    }

    /// Enables a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn enable(&self, handle: StopPointHandle) -> Result<(), SimError> {
        self.registry_mut()?.point_mut(handle)?.set_enabled(true);
        Ok(())
    }

    /// Disables a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn disable(&self, handle: StopPointHandle) -> Result<(), SimError> {
        self.registry_mut()?.point_mut(handle)?.set_enabled(false);
        Ok(())
    }

    /// Enables every stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn enable_all(&self) -> Result<(), SimError> {
        for point in self.registry_mut()?.points.values_mut() {
            point.set_enabled(true);
        }
        Ok(())
    }

    /// Disables every stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn disable_all(&self) -> Result<(), SimError> {
        for point in self.registry_mut()?.points.values_mut() {
            point.set_enabled(false);
        }
        Ok(())
    }

    /// Enables a stop point that deletes itself the next time it fires.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn enable_once_and_delete(&self, handle: StopPointHandle) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        let point = registry.point_mut(handle)?;
        point.set_enabled(true);
        point.set_deleted_after_trigger(true);
        Ok(())
    }

    /// Enables a stop point that disables itself the next time it fires.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn enable_once_and_disable(&self, handle: StopPointHandle) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        let point = registry.point_mut(handle)?;
        point.set_enabled(true);
        point.set_disabled_after_trigger(true);
        Ok(())
    }

    /// Returns the handle of the `index`th stop point in handle order.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::OutOfRange`] if `index` is not below [`Self::stop_point_count`].
    pub fn stop_point_handle(&self, index: usize) -> Result<StopPointHandle, SimError> {
        let registry = self.inner.borrow();
        registry
            .points
            .keys()
            .nth(index)
            .copied()
            .ok_or(SimError::OutOfRange {
                what: "stop point",
                index,
                count: registry.points.len(),
            })
    }

    /// Returns a copy of a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered.
    pub fn stop_point_with_handle(&self, handle: StopPointHandle) -> Result<StopPoint, SimError> {
        self.inner
            .borrow()
            .points
            .get(&handle)
            .cloned()
            .ok_or_else(|| SimError::not_found("stop point", handle.to_string()))
    }

    /// Returns the number of stop points.
    pub fn stop_point_count(&self) -> usize {
        self.inner.borrow().points.len()
    }

    /// Sets how many qualifying hits a stop point ignores.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn set_ignore(&self, handle: StopPointHandle, count: u32) -> Result<(), SimError> {
        self.registry_mut()?
            .point_mut(handle)?
            .set_ignore_count(count);
        Ok(())
    }

    /// Attaches a condition to a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn set_condition(
        &self,
        handle: StopPointHandle,
        condition: Condition,
    ) -> Result<(), SimError> {
        self.registry_mut()?
            .point_mut(handle)?
            .set_condition(condition);
        Ok(())
    }

    /// Removes the condition of a stop point.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if `handle` is not registered
    /// and [`SimError::SimulationExecution`] if called during a sweep.
    pub fn remove_condition(&self, handle: StopPointHandle) -> Result<(), SimError> {
        self.registry_mut()?.point_mut(handle)?.remove_condition();
        Ok(())
    }

    /// Returns the number of stop points that caused the current stop.
    ///
    /// Zero once a cycle has run after the stop or the controller was reset.
    pub fn stop_causing_stop_point_count(&self) -> usize {
        let registry = self.inner.borrow();
        if registry.last_stop == Some(registry.clock.stamp()) {
            registry.stop_causing.len()
        } else {
            0
        }
    }

    /// Returns the handle of the `index`th stop point that caused the current stop.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::OutOfRange`] if `index` is not below
    /// [`Self::stop_causing_stop_point_count`].
    pub fn stop_causing_stop_point(&self, index: usize) -> Result<StopPointHandle, SimError> {
        let count = self.stop_causing_stop_point_count();
        if index >= count {
            return Err(SimError::OutOfRange {
                what: "stop-causing stop point",
                index,
                count,
            });
        }
        Ok(self.inner.borrow().stop_causing[index])
    }

    /// Returns `true` while the manager listens for new-instruction events.
    pub fn is_subscribed(&self) -> bool {
        self.inner.borrow().subscribed
    }

    /// Adapts preserved stop points to a newly loaded program.
    ///
    /// Breakpoints at addresses without an instruction are disabled and
    /// watch caches are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if called during a sweep.
    pub fn revalidate(&self, memory: &InstructionMemory) -> Result<(), SimError> {
        let mut registry = self.registry_mut()?;
        let mut disabled = 0_usize;
        for point in registry.points.values_mut() {
            point.reset_cache();
            let orphaned = point
                .address()
                .is_some_and(|address| !memory.has_instruction_at(address));
            if orphaned && point.is_enabled() {
                point.set_enabled(false);
                disabled += 1;
            }
        }
        registry.clear_stop_record();
        info!(
            preserved = registry.points.len(),
            disabled, "stop points revalidated against the new program"
        );
        Ok(())
    }
}
