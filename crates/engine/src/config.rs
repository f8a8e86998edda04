//! Configuration system for the simulation engine.
//!
//! This module defines the configuration structures used to parameterize a
//! simulation session. It provides:
//! 1. **Defaults:** Baseline values for run limits and the exit procedure name.
//! 2. **Structures:** Hierarchical config for the run loop, runtime errors, and stop points.
//! 3. **Enums:** Execution backend, execution model, and reload policy.
//!
//! Configuration is supplied as JSON by the embedding front end, or use `Config::default()`.

use serde::Deserialize;

use crate::common::{RuntimeErrorKind, Severity, SimError};

/// Default configuration constants for the simulator.
mod defaults {
    /// Name of the procedure whose first instruction ends the program.
    pub const EXIT_PROCEDURE: &str = "_exit";
}

/// Execution strategy used by the simulation controller.
///
/// Chosen when the controller is created; it cannot be switched afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Backend {
    /// Walk the instruction memory every cycle.
    #[default]
    Interpreted,
    /// Pre-translate basic blocks into native callables dispatched through a jump table.
    Compiled,
}

/// Instruction execution model of the simulated core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExecutionModel {
    /// Every transport is an explicit bus move.
    #[default]
    TransportTriggered,
    /// Explicit instructions may imply additional same-cycle transports.
    OperationTriggered,
}

/// What happens to stop points when a new machine or program is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReloadPolicy {
    /// Delete every stop point.
    #[default]
    Discard,
    /// Keep stop points; breakpoints at addresses without an instruction are disabled.
    Preserve,
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use ttasim_core::config::{Backend, Config};
///
/// let config = Config::from_json(r#"{ "simulation": { "backend": "Compiled" } }"#).unwrap();
/// assert_eq!(config.simulation.backend, Backend::Compiled);
/// assert_eq!(config.simulation.exit_procedure, "_exit");
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Run loop settings
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Runtime error severity policy
    #[serde(default)]
    pub runtime_errors: RuntimeErrorConfig,
    /// Stop point behaviour
    #[serde(default)]
    pub stop_points: StopPointConfig,
}

impl Config {
    /// Parses a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json)
            .map_err(|e| SimError::SimulationExecution(format!("invalid configuration: {e}")))
    }
}

/// Run loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Execution backend
    #[serde(default)]
    pub backend: Backend,

    /// Execution model
    #[serde(default)]
    pub execution_model: ExecutionModel,

    /// Wall-clock budget for a single run call, in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Procedure whose entry marks program exit
    #[serde(default = "SimulationConfig::default_exit_procedure")]
    pub exit_procedure: String,

    /// Report function unit result port collisions as runtime errors
    #[serde(default)]
    pub fu_conflict_detection: bool,
}

impl SimulationConfig {
    /// Returns the default exit procedure name.
    fn default_exit_procedure() -> String {
        defaults::EXIT_PROCEDURE.to_string()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            execution_model: ExecutionModel::default(),
            timeout_seconds: None,
            exit_procedure: Self::default_exit_procedure(),
            fu_conflict_detection: false,
        }
    }
}

/// Severity policy for runtime errors.
///
/// Kinds without an override use `default_severity`, which is `Fatal` unless
/// configured otherwise.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RuntimeErrorConfig {
    /// Severity applied when no per-kind override exists
    #[serde(default)]
    pub default_severity: Severity,

    /// Override for division by zero
    #[serde(default)]
    pub division_by_zero: Option<Severity>,

    /// Override for invalid memory references
    #[serde(default)]
    pub invalid_memory_reference: Option<Severity>,

    /// Override for triggers without an operation code
    #[serde(default)]
    pub unknown_operation: Option<Severity>,

    /// Override for function unit resource conflicts
    #[serde(default)]
    pub resource_conflict: Option<Severity>,
}

impl RuntimeErrorConfig {
    /// Returns the severity assigned to a runtime error kind.
    pub fn severity_of(&self, kind: RuntimeErrorKind) -> Severity {
        let over = match kind {
            RuntimeErrorKind::DivisionByZero => self.division_by_zero,
            RuntimeErrorKind::InvalidMemoryReference => self.invalid_memory_reference,
            RuntimeErrorKind::UnknownOperation => self.unknown_operation,
            RuntimeErrorKind::ResourceConflict => self.resource_conflict,
        };
        over.unwrap_or(self.default_severity)
    }
}

/// Stop point configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StopPointConfig {
    /// Reload policy
    #[serde(default)]
    pub on_reload: ReloadPolicy,
}
