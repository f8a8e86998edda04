use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ttasim_core::common::SimValue;
use ttasim_core::sim::StateView;
use ttasim_core::sim::stop_point::{EvaluationError, ExpressionEvaluator};

/// Expressions evaluated so far, shared with the test body.
pub type EvaluationLog = Rc<RefCell<Vec<String>>>;

/// Evaluator returning pre-scripted values in order.
///
/// Once the script runs out every evaluation fails.
pub struct ScriptedEvaluator {
    script: VecDeque<i64>,
    log: EvaluationLog,
}

impl ScriptedEvaluator {
    pub fn new(script: &[i64]) -> (Self, EvaluationLog) {
        let log = EvaluationLog::default();
        let evaluator = Self {
            script: script.iter().copied().collect(),
            log: Rc::clone(&log),
        };
        (evaluator, log)
    }
}

impl ExpressionEvaluator for ScriptedEvaluator {
    fn evaluate(
        &mut self,
        expression: &str,
        _view: &dyn StateView,
    ) -> Result<SimValue, EvaluationError> {
        self.log.borrow_mut().push(expression.to_string());
        self.script
            .pop_front()
            .map(|v| SimValue::from_signed(v, 32))
            .ok_or_else(|| EvaluationError::new(expression, "script exhausted"))
    }
}
