//! Simulation session.
//!
//! The session owns everything that outlives a single program load: the
//! configuration, the operation pool, the event bus, and the stop points.
//! Loading a machine and program replaces the controller; what happens to
//! existing stop points is decided by [`ReloadPolicy`].

use tracing::info;

use super::controller::SimulationController;
use super::events::EventBus;
use super::stop_point::ExpressionEvaluator;
use super::stop_point_manager::StopPointManager;
use crate::common::{InstructionAddress, SimError, SimulationClock};
use crate::config::{Config, ReloadPolicy};
use crate::core::units::OperationPool;
use crate::model::{Machine, Program};

/// A simulation session.
#[derive(Debug)]
pub struct Simulator {
    config: Config,
    operations: OperationPool,
    events: EventBus,
    stop_points: StopPointManager,
    controller: Option<SimulationController>,
}

impl Simulator {
    /// Creates a session with the built-in operations and no program loaded.
    pub fn new(config: Config) -> Self {
        let events = EventBus::new();
        let stop_points = StopPointManager::new(events.clone(), SimulationClock::default());
        Self::with_parts(config, events, stop_points)
    }

    /// Creates a session whose conditions and watches use `evaluator`.
    pub fn with_evaluator(config: Config, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        let events = EventBus::new();
        let stop_points =
            StopPointManager::with_evaluator(events.clone(), SimulationClock::default(), evaluator);
        Self::with_parts(config, events, stop_points)
    }

    fn with_parts(config: Config, events: EventBus, stop_points: StopPointManager) -> Self {
        Self {
            config,
            operations: OperationPool::with_builtins(),
            events,
            stop_points,
            controller: None,
        }
    }

    /// Returns the operation pool, for registering custom operations before loading.
    pub const fn operations_mut(&mut self) -> &mut OperationPool {
        &mut self.operations
    }

    /// Loads a machine and program, replacing any previous controller.
    ///
    /// On failure the previous controller is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalMachine`] or [`SimError::IllegalProgram`] if
    /// the pair cannot be simulated.
    pub fn load(&mut self, machine: &Machine, program: &Program) -> Result<(), SimError> {
        let controller = SimulationController::new(
            machine,
            program,
            &self.config,
            &self.operations,
            self.events.clone(),
        )?;
        match self.config.stop_points.on_reload {
            ReloadPolicy::Discard => {
                if self.stop_points.stop_point_count() > 0 {
                    info!(
                        discarded = self.stop_points.stop_point_count(),
                        "stop points discarded on reload"
                    );
                }
                self.stop_points.delete_all()?;
            }
            ReloadPolicy::Preserve => self
                .stop_points
                .revalidate(controller.instruction_memory())?,
        }
        self.stop_points.attach_clock(controller.clock())?;
        self.controller = Some(controller);
        Ok(())
    }

    /// Returns `true` once a program is loaded.
    pub const fn is_loaded(&self) -> bool {
        self.controller.is_some()
    }

    /// Returns the controller of the loaded program.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if nothing is loaded.
    pub fn controller(&self) -> Result<&SimulationController, SimError> {
        self.controller.as_ref().ok_or_else(Self::not_loaded)
    }

    /// Returns the controller of the loaded program, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if nothing is loaded.
    pub fn controller_mut(&mut self) -> Result<&mut SimulationController, SimError> {
        self.controller.as_mut().ok_or_else(Self::not_loaded)
    }

    fn not_loaded() -> SimError {
        SimError::SimulationExecution("no program loaded".to_string())
    }

    /// Runs the loaded program until a stop condition is met.
    ///
    /// # Errors
    ///
    /// See [`SimulationController::run`].
    pub fn run(&mut self) -> Result<(), SimError> {
        self.controller_mut()?.run()
    }

    /// Steps the loaded program.
    ///
    /// # Errors
    ///
    /// See [`SimulationController::step`].
    pub fn step(&mut self, count: u64) -> Result<(), SimError> {
        self.controller_mut()?.step(count)
    }

    /// Steps the loaded program over calls.
    ///
    /// # Errors
    ///
    /// See [`SimulationController::next`].
    pub fn next(&mut self, count: u64) -> Result<(), SimError> {
        self.controller_mut()?.next(count)
    }

    /// Runs the loaded program until `address`.
    ///
    /// # Errors
    ///
    /// See [`SimulationController::run_until`].
    pub fn run_until(&mut self, address: InstructionAddress) -> Result<(), SimError> {
        self.controller_mut()?.run_until(address)
    }

    /// Rewinds the loaded program.
    ///
    /// Stop points are kept, but their watch caches and the record of which
    /// points caused the last stop are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if nothing is loaded.
    pub fn reset(&mut self) -> Result<(), SimError> {
        self.controller_mut()?.reset();
        self.stop_points.rewind()
    }

    /// Returns the stop point manager.
    pub const fn stop_points(&self) -> &StopPointManager {
        &self.stop_points
    }

    /// Returns the event bus.
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
