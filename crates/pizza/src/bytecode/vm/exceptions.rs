//! Runtime error unwinding: traceback capture, catcher frames and run-level unwinding.

use std::sync::Arc;

use super::{Flow, VM};
use crate::{
    exception::{CodeSite, RaisedError, RunError, RunResult},
    value::{ResultValue, Value},
};

impl VM {
    /// Handles a runtime error raised while running down to `exit_level`.
    ///
    /// The traceback is captured the first time the error is seen. The innermost catcher
    /// frame at or above `exit_level` turns the error into a result value returned to its
    /// caller. Without one, this run's frames are unwound and the error is handed back to
    /// whoever started the run.
    pub(super) fn handle_error(&mut self, mut raised: Box<RaisedError>, exit_level: usize) -> RunResult<Flow> {
        if !raised.is_captured() {
            let traceback = self.root_trace.as_ref().map(|root| {
                std::iter::once(root.clone())
                    .chain(self.frames.iter().filter_map(|frame| frame.trace.clone()))
                    .collect()
            });
            let origin = self.frames.last().map(|frame| CodeSite {
                chunk: Arc::clone(frame.chunk()),
                offset: frame.op_start,
            });
            raised.capture(traceback, origin);
        }
        self.last_error = Some(raised.error.clone());

        let catcher = (exit_level..self.frames.len())
            .rev()
            .find(|&index| self.frames[index].catch_errors);
        if let Some(index) = catcher {
            log::debug!("{} caught by {}", raised.error, self.frames[index].closure.name());
            self.frames.truncate(index + 1);
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| RunError::internal("catcher frame vanished"))?;
            let result = Value::Result(Arc::new(ResultValue::Err(raised.error)));
            return self.finish_frame(frame, result, exit_level);
        }

        if let Some(base) = self.frames.get(exit_level) {
            let (slots, loop_base) = (base.slots, base.loop_base);
            self.frames.truncate(exit_level);
            self.stack.truncate(slots);
            self.loop_cache.truncate(loop_base);
        }
        Err(RunError::Runtime(raised))
    }
}
