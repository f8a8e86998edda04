//! Breakpoints, watches, and their conditions.
//!
//! A stop point is a value type: the manager stores its own copy, and
//! copies handed out by lookups never alias the stored point.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use super::events::StateView;
use crate::common::{ClockCycleCount, InstructionAddress, SimValue};

/// Failure to evaluate a condition or watch expression.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("cannot evaluate '{expression}': {message}")]
pub struct EvaluationError {
    /// The expression that failed.
    pub expression: String,
    /// Why it failed.
    pub message: String,
}

impl EvaluationError {
    /// Creates an evaluation error.
    pub fn new(expression: &str, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluates condition and watch expressions against the machine.
///
/// Implemented by the embedding front end's scripting layer.
///
/// Evaluation happens while the stop point registry is borrowed. An
/// evaluator holding a [`StopPointManager`](super::StopPointManager) handle
/// gets [`SimError::SimulationExecution`](crate::common::SimError) from its
/// mutators and must not call its read accessors.
pub trait ExpressionEvaluator {
    /// Evaluates `expression` in the current machine state.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] if the expression cannot be evaluated now.
    fn evaluate(
        &mut self,
        expression: &str,
        view: &dyn StateView,
    ) -> Result<SimValue, EvaluationError>;
}

/// Evaluator understanding a single qualified name or an integer literal.
///
/// Used when no scripting layer is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolEvaluator;

impl ExpressionEvaluator for SymbolEvaluator {
    fn evaluate(
        &mut self,
        expression: &str,
        view: &dyn StateView,
    ) -> Result<SimValue, EvaluationError> {
        let text = expression.trim();
        if let Some(value) = view.value_of(text) {
            return Ok(value);
        }
        let literal = text
            .strip_prefix("0x")
            .map_or_else(|| text.parse::<i64>(), |hex| i64::from_str_radix(hex, 16));
        literal
            .map(|v| SimValue::from_signed(v, 64))
            .map_err(|_| EvaluationError::new(text, "unknown name"))
    }
}

/// A boolean guard on a stop point, evaluated by the installed evaluator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    script: String,
}

impl Condition {
    /// Creates a condition from its expression text.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Returns the expression text.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Evaluates the condition; failures count as false for this cycle.
    pub fn is_true(&self, view: &dyn StateView, evaluator: &mut dyn ExpressionEvaluator) -> bool {
        match evaluator.evaluate(&self.script, view) {
            Ok(value) => value.is_nonzero(),
            Err(e) => {
                warn!(error = %e, "condition evaluation failed; treated as false");
                false
            }
        }
    }
}

/// An expression whose value change stops the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watch {
    expression: String,
    previous: Option<SimValue>,
    checked_cycle: Option<ClockCycleCount>,
    triggered: bool,
}

impl Watch {
    /// Creates a watch on `expression`.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            previous: None,
            checked_cycle: None,
            triggered: false,
        }
    }

    /// Returns the watched expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the value cached by the last evaluation.
    pub const fn previous_value(&self) -> Option<SimValue> {
        self.previous
    }

    /// Evaluates the expression at most once per cycle.
    ///
    /// The first evaluation only records a baseline. Later evaluations
    /// trigger when the value differs from the cached one.
    fn is_triggered(
        &mut self,
        view: &dyn StateView,
        evaluator: &mut dyn ExpressionEvaluator,
    ) -> bool {
        let cycle = view.cycle_count();
        if self.checked_cycle == Some(cycle) {
            return self.triggered;
        }
        self.checked_cycle = Some(cycle);
        match evaluator.evaluate(&self.expression, view) {
            Ok(value) => {
                self.triggered = self.previous.is_some_and(|p| p != value);
                self.previous = Some(value);
            }
            Err(e) => {
                warn!(error = %e, "watch evaluation failed; treated as unchanged");
                self.triggered = false;
            }
        }
        self.triggered
    }

    fn reset_cache(&mut self) {
        self.previous = None;
        self.checked_cycle = None;
        self.triggered = false;
    }
}

/// Stop point variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopPointKind {
    /// Triggers when the program counter equals `address`.
    Breakpoint {
        /// Instruction address.
        address: InstructionAddress,
    },
    /// Triggers when the watched value changes.
    Watch(Watch),
}

/// A breakpoint or watch with its firing policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopPoint {
    kind: StopPointKind,
    enabled: bool,
    condition: Option<Condition>,
    ignore_count: u32,
    disable_after_trigger: bool,
    delete_after_trigger: bool,
}

impl StopPoint {
    fn with_kind(kind: StopPointKind) -> Self {
        Self {
            kind,
            enabled: true,
            condition: None,
            ignore_count: 0,
            disable_after_trigger: false,
            delete_after_trigger: false,
        }
    }

    /// Creates an enabled, unconditional breakpoint.
    pub fn breakpoint(address: InstructionAddress) -> Self {
        Self::with_kind(StopPointKind::Breakpoint { address })
    }

    /// Creates an enabled, unconditional watch.
    pub fn watch(expression: impl Into<String>) -> Self {
        Self::with_kind(StopPointKind::Watch(Watch::new(expression)))
    }

    /// Returns the variant.
    pub const fn kind(&self) -> &StopPointKind {
        &self.kind
    }

    /// Returns `true` if the trigger predicate holds.
    ///
    /// Ignores the enabled flag, the ignore count, and the condition.
    pub fn is_triggered(
        &mut self,
        view: &dyn StateView,
        evaluator: &mut dyn ExpressionEvaluator,
    ) -> bool {
        match &mut self.kind {
            StopPointKind::Breakpoint { address } => view.program_counter() == *address,
            StopPointKind::Watch(watch) => watch.is_triggered(view, evaluator),
        }
    }

    /// Returns `true` if there is no condition or it holds.
    pub fn is_condition_ok(
        &self,
        view: &dyn StateView,
        evaluator: &mut dyn ExpressionEvaluator,
    ) -> bool {
        self.condition
            .as_ref()
            .is_none_or(|c| c.is_true(view, evaluator))
    }

    /// Returns `true` if the point participates in firing.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the point.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns the condition, if any.
    pub const fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Sets the condition.
    pub fn set_condition(&mut self, condition: Condition) {
        self.condition = Some(condition);
    }

    /// Removes the condition.
    pub fn remove_condition(&mut self) {
        self.condition = None;
    }

    /// Returns the number of qualifying hits still to be ignored.
    pub const fn ignore_count(&self) -> u32 {
        self.ignore_count
    }

    /// Sets the ignore count.
    pub const fn set_ignore_count(&mut self, count: u32) {
        self.ignore_count = count;
    }

    /// Spends one ignored hit.
    pub const fn decrement_ignore_count(&mut self) {
        self.ignore_count = self.ignore_count.saturating_sub(1);
    }

    /// Returns `true` if the point disables itself after firing.
    pub const fn is_disabled_after_trigger(&self) -> bool {
        self.disable_after_trigger
    }

    /// Sets whether the point disables itself after firing.
    pub const fn set_disabled_after_trigger(&mut self, flag: bool) {
        self.disable_after_trigger = flag;
    }

    /// Returns `true` if the point deletes itself after firing.
    pub const fn is_deleted_after_trigger(&self) -> bool {
        self.delete_after_trigger
    }

    /// Sets whether the point deletes itself after firing.
    pub const fn set_deleted_after_trigger(&mut self, flag: bool) {
        self.delete_after_trigger = flag;
    }

    /// Returns the breakpoint address, if this is a breakpoint.
    pub const fn address(&self) -> Option<InstructionAddress> {
        match self.kind {
            StopPointKind::Breakpoint { address } => Some(address),
            StopPointKind::Watch(_) => None,
        }
    }

    /// Forgets cached watch values.
    pub fn reset_cache(&mut self) {
        if let StopPointKind::Watch(watch) = &mut self.kind {
            watch.reset_cache();
        }
    }

    /// Returns a one-line human-readable description.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StopPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StopPointKind::Breakpoint { address } => write!(f, "breakpoint at {address:#x}")?,
            StopPointKind::Watch(watch) => write!(f, "watch '{}'", watch.expression)?,
        }
        if let Some(condition) = &self.condition {
            write!(f, " if {}", condition.script)?;
        }
        if self.ignore_count > 0 {
            write!(f, ", ignoring next {} hits", self.ignore_count)?;
        }
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        Ok(())
    }
}
