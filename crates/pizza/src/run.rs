//! Public interface for running bytecode: entry points, failure reporting, program entry
//! and module namespaces.

use std::{sync::Arc, thread::JoinHandle};

use indexmap::IndexMap;

use crate::{
    bytecode::{VM, VmConfig},
    exception::{ErrorKind, RunError, RuntimeError},
    function::Closure,
    runtime::Runtime,
    types::Namespace,
    value::Value,
    var::Var,
};

/// Handles of the threads running a VM's async calls.
pub type AsyncTasks = Vec<JoinHandle<Result<Value, RunError>>>;

impl VM {
    /// Runs the entry frame to completion and returns its result.
    ///
    /// An uncaught error marks the VM as failed. In normal mode it is logged with
    /// `log::error!` and the VM is reset; in safe mode it is logged with `log::warn!`.
    /// Resource and internal errors always reset the VM.
    ///
    /// # Errors
    /// The uncaught error, which is also kept as [`VM::last_error`] for runtime errors.
    pub fn run(&mut self) -> Result<Value, RunError> {
        let Some(exit_level) = self.frames.len().checked_sub(1) else {
            return Err(RunError::internal("no frame to run"));
        };
        match self.execute(exit_level) {
            Ok(()) => self.pop(),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Calls the program's entry point with the process arguments as a list of texts.
    ///
    /// The entry point is the global function named by a `SetMainFunction` header, or the
    /// `main` method of the class named by `SetMainClass`, called with the class bound.
    /// Returns `Ok(None)` when no entry point was declared.
    pub fn finish<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Option<Value>, RunError> {
        let argv = Value::list(args.iter().map(|arg| Value::text(arg.as_ref())).collect());
        let (closure, bound) = match self.entry_point() {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(error) => return Err(self.raise_outside(error)),
        };
        log::debug!("calling entry point {}", closure.name());

        let depth = self.frames.len();
        if let Err(err) = self.enter_entry_point(closure, bound, argv) {
            self.fail(&err);
            return Err(err);
        }
        if self.frames.len() > depth {
            self.run().map(Some)
        } else {
            // async entry points return immediately
            self.pop().map(Some)
        }
    }

    fn enter_entry_point(&mut self, closure: Arc<Closure>, bound: Option<Value>, argv: Value) -> Result<(), RunError> {
        self.push(match &bound {
            Some(receiver) => Value::Cell(Var::constant(receiver.clone())),
            None => Value::Closure(Arc::clone(&closure)),
        })?;
        self.push(argv.clone())?;
        self.call_closure(closure, bound, vec![argv], IndexMap::new(), false)
    }

    fn entry_point(&self) -> Result<Option<(Arc<Closure>, Option<Value>)>, RuntimeError> {
        if let Some(name) = &self.main_function {
            return match self.global(name) {
                Some(Value::Closure(closure)) => Ok(Some((closure, None))),
                _ => Err(ErrorKind::Scope.error("Main function not found")),
            };
        }
        if let Some(name) = &self.main_class {
            let Some(Value::Class(class)) = self.global(name) else {
                return Err(ErrorKind::Scope.error("Main class not found"));
            };
            let Some(Value::Closure(method)) = class.get_field("main", true).found() else {
                return Err(ErrorKind::Scope.error("Main method not found"));
            };
            return Ok(Some((method, Some(Value::Class(class)))));
        }
        Ok(None)
    }

    /// The VM's globals as a namespace: the exported names if the program declared
    /// exports, otherwise every global in name order.
    ///
    /// The namespace shares the VM's variable cells.
    #[must_use]
    pub fn as_namespace(&self, name: impl Into<Arc<str>>) -> Namespace {
        let fields: IndexMap<Arc<str>, Var> = match &self.exports {
            Some(exports) => exports
                .iter()
                .filter_map(|export| self.globals.get(export).map(|var| (Arc::clone(export), var.clone())))
                .collect(),
            None => {
                let mut names: Vec<&Arc<str>> = self.globals.keys().collect();
                names.sort();
                names
                    .into_iter()
                    .map(|global| (Arc::clone(global), self.globals[global].clone()))
                    .collect()
            }
        };
        Namespace::new(name, fields)
    }

    /// Waits for every async call this VM spawned and returns their results in spawn order.
    ///
    /// Scripts never observe these results; this is for hosts that need the work finished.
    pub fn join_async(&mut self) -> Vec<Result<Value, RunError>> {
        self.tasks
            .drain(..)
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(RunError::internal("async call panicked")))
            })
            .collect()
    }

    /// Records an error raised outside of any frame, such as a missing entry point.
    fn raise_outside(&mut self, error: RuntimeError) -> RunError {
        self.last_error = Some(error.clone());
        let err = RunError::from(error);
        self.fail(&err);
        err
    }

    /// Marks the VM as failed and reports `err` according to the VM's mode.
    fn fail(&mut self, err: &RunError) {
        self.failed = true;
        match err {
            RunError::Runtime(raised) => {
                if !self.simulation {
                    if self.config.safe {
                        log::warn!("{}", raised.report());
                    } else {
                        log::error!("{}", raised.report());
                    }
                }
                if !self.config.safe {
                    self.reset_stack();
                }
            }
            fatal => {
                if !self.simulation {
                    log::error!("{fatal}");
                }
                self.reset_stack();
            }
        }
    }
}

impl Runtime {
    /// Calls `closure` in simulation mode, the way a native helper would: the arguments
    /// must match its arity exactly and a failure comes back as a plain error value
    /// instead of being logged.
    ///
    /// # Errors
    /// The error the closure raised. Resource and internal errors are reported with the
    /// kind `Internal`.
    pub fn simulate(self: &Arc<Self>, closure: &Arc<Closure>, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
        let function = &closure.function;
        if args.len() != function.arity {
            return Err(ErrorKind::ArgumentCount.error(format!(
                "Expected {} but got {}",
                function.arity,
                args.len()
            )));
        }
        if function.variadic {
            args.push(Value::list(Vec::new()));
        }
        if function.takes_kwargs {
            args.push(Value::map([]));
        }
        let config = VmConfig::new().safe(true);
        let mut vm = VM::for_call(Arc::clone(self), config, Arc::clone(closure), None, args).simulated();
        vm.run().map_err(|err| match err {
            RunError::Runtime(raised) => raised.error,
            fatal => RuntimeError::new("Internal", fatal.to_string()),
        })
    }
}
