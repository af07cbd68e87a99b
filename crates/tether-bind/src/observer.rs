#![forbid(unsafe_code)]

//! Expression compiler and the composed observer.
//!
//! # Design
//!
//! [`compile`] turns a parsed [`Expression`] into an [`Observer`], the one
//! contract directives consume:
//!
//! - `get()` reads the target (path value or literal constant) and folds
//!   it through each formatter's pull, left-to-right, handing every stage
//!   the current values of its argument targets.
//! - `set(value)` mirrors it: each formatter's push runs right-to-left,
//!   then the result is written through the target.
//! - `notify(callback)` tracks the deduplicated union of the target path,
//!   every formatter-argument path, and every explicit watch path. Any of
//!   them changing re-invokes the callback with a freshly recomputed
//!   `get()` value and the previously computed one — deliberately without
//!   comparing them, so watch-only dependencies re-notify even when the
//!   computed value is unchanged.
//!
//! Formatter names resolve against the registry once, at compile time; a
//! missing name fails the whole compilation, not the first use.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Surface |
//! |---------|-------|---------|
//! | `UnresolvedFormatter` | name absent from registry | `compile` |
//! | `ReadOnlyTarget` | `set` on a literal target | `Observer::set` |
//! | `MissingPush` | `set` traverses a pull-only formatter | `Observer::set` |
//! | `Target(InvalidTarget)` | write through a broken chain | `Observer::set` |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::debug;

use tether_observe::{AccessError, Context, ContextCallback, PathDescriptor, Value};

use crate::expr::{Expression, Target};
use crate::formatter::{Formatter, FormatterRegistry};

/// Errors from compiling an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnresolvedFormatter { name: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedFormatter { name } => {
                write!(f, "formatter '{name}' is not registered")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors from writing through a composed observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SetError {
    /// The expression's target is a primitive literal.
    ReadOnlyTarget,
    /// A traversed formatter has no push transform.
    MissingPush { formatter: String },
    /// The target path could not be written through.
    Target(AccessError),
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnlyTarget => write!(f, "cannot write through a literal target"),
            Self::MissingPush { formatter } => {
                write!(f, "formatter '{formatter}' has no push transform")
            }
            Self::Target(err) => write!(f, "target write failed: {err}"),
        }
    }
}

impl std::error::Error for SetError {}

impl From<AccessError> for SetError {
    fn from(err: AccessError) -> Self {
        Self::Target(err)
    }
}

/// Callback invoked with the freshly recomputed value and the previous one.
pub type ObserverCallback = Rc<dyn Fn(&Value, &Value)>;

/// A compiled operand: literal constant, or pre-parsed path.
#[derive(Clone)]
enum Operand {
    Literal(Value),
    Path { key: String, descriptor: PathDescriptor },
}

impl Operand {
    fn from_target(target: &Target) -> Self {
        match target {
            Target::Literal(value) => Self::Literal(value.clone()),
            Target::Path(raw) => {
                let descriptor = PathDescriptor::parse(raw);
                Self::Path {
                    key: descriptor.to_string(),
                    descriptor,
                }
            }
        }
    }

    fn read(&self, ctx: &Context) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Path { descriptor, .. } => ctx.value_of(descriptor),
        }
    }
}

/// One resolved formatter application.
#[derive(Clone)]
struct Stage {
    name: String,
    formatter: Formatter,
    args: Vec<Operand>,
}

struct ObserverInner {
    ctx: Context,
    target: Operand,
    stages: Vec<Stage>,
    /// Canonical dependency paths: target, formatter arguments, watch.
    deps: Vec<String>,
    consumers: SmallVec<[ObserverCallback; 1]>,
    /// The one context callback registered for every dependency path.
    dep_cb: Option<ContextCallback>,
    /// Last computed value, reported as `old` on the next notification.
    last: Value,
}

/// The compiled get/set/notify contract.
pub struct Observer {
    inner: Rc<RefCell<ObserverInner>>,
}

/// Compile an expression against a context and formatter registry.
pub fn compile(
    expr: &Expression,
    ctx: &Context,
    registry: &FormatterRegistry,
) -> Result<Observer, CompileError> {
    let mut stages = Vec::with_capacity(expr.formatters.len());
    for invocation in &expr.formatters {
        let formatter = registry
            .get(&invocation.name)
            .ok_or_else(|| CompileError::UnresolvedFormatter {
                name: invocation.name.clone(),
            })?
            .clone();
        stages.push(Stage {
            name: invocation.name.clone(),
            formatter,
            args: invocation.args.iter().map(Operand::from_target).collect(),
        });
    }

    let target = Operand::from_target(&expr.target);

    let mut deps: Vec<String> = Vec::new();
    let mut track = |operand: &Operand| {
        if let Operand::Path { key, .. } = operand {
            if !deps.iter().any(|d| d == key) {
                deps.push(key.clone());
            }
        }
    };
    track(&target);
    for stage in &stages {
        for arg in &stage.args {
            track(arg);
        }
    }
    for watch in &expr.watch {
        track(&Operand::from_target(&Target::Path(watch.clone())));
    }

    debug!(
        target: "tether::bind",
        deps = deps.len(),
        stages = stages.len(),
        "compiled expression"
    );

    Ok(Observer {
        inner: Rc::new(RefCell::new(ObserverInner {
            ctx: ctx.clone(),
            target,
            stages,
            deps,
            consumers: SmallVec::new(),
            dep_cb: None,
            last: Value::Undefined,
        })),
    })
}

/// Evaluate the pipeline: target value through every pull, left-to-right.
fn evaluate(ctx: &Context, target: &Operand, stages: &[Stage]) -> Value {
    let mut value = target.read(ctx);
    for stage in stages {
        let args: Vec<Value> = stage.args.iter().map(|arg| arg.read(ctx)).collect();
        value = stage.formatter.apply_pull(value, &args);
    }
    value
}

impl Observer {
    /// Recompute the expression's current value.
    #[must_use]
    pub fn get(&self) -> Value {
        let (ctx, target, stages) = {
            let inner = self.inner.borrow();
            (inner.ctx.clone(), inner.target.clone(), inner.stages.clone())
        };
        evaluate(&ctx, &target, &stages)
    }

    /// Write a value back through the pipeline: push transforms run
    /// right-to-left, then the result lands on the target path.
    pub fn set(&self, value: Value) -> Result<(), SetError> {
        let (ctx, target, stages) = {
            let inner = self.inner.borrow();
            (inner.ctx.clone(), inner.target.clone(), inner.stages.clone())
        };
        let mut value = value;
        for stage in stages.iter().rev() {
            if !stage.formatter.has_push() {
                return Err(SetError::MissingPush {
                    formatter: stage.name.clone(),
                });
            }
            let args: Vec<Value> = stage.args.iter().map(|arg| arg.read(&ctx)).collect();
            value = stage
                .formatter
                .apply_push(value, &args)
                .expect("push presence checked above");
        }
        match &target {
            Operand::Literal(_) => Err(SetError::ReadOnlyTarget),
            Operand::Path { descriptor, .. } => {
                ctx.assign(descriptor, value)?;
                Ok(())
            }
        }
    }

    /// Register a callback for changes of any dependency. The first
    /// registration installs the dependency subscriptions and primes the
    /// previous-value cache.
    pub fn notify(&self, callback: ObserverCallback) {
        let install = {
            let mut inner = self.inner.borrow_mut();
            inner.consumers.push(callback);
            inner.dep_cb.is_none()
        };
        if !install {
            return;
        }

        // Prime the cache so the first notification has a real old value.
        let initial = self.get();

        let weak: Weak<RefCell<ObserverInner>> = Rc::downgrade(&self.inner);
        let dep_cb: ContextCallback = Rc::new(move |_, _| {
            let Some(strong) = weak.upgrade() else { return };
            let (ctx, target, stages) = {
                let inner = strong.borrow();
                (inner.ctx.clone(), inner.target.clone(), inner.stages.clone())
            };
            let fresh = evaluate(&ctx, &target, &stages);
            let (consumers, previous) = {
                let mut inner = strong.borrow_mut();
                let previous = std::mem::replace(&mut inner.last, fresh.clone());
                (inner.consumers.clone(), previous)
            };
            for consumer in &consumers {
                consumer(&fresh, &previous);
            }
        });

        let (ctx, deps) = {
            let mut inner = self.inner.borrow_mut();
            inner.last = initial;
            inner.dep_cb = Some(Rc::clone(&dep_cb));
            (inner.ctx.clone(), inner.deps.clone())
        };
        for dep in &deps {
            ctx.observe(dep, Rc::clone(&dep_cb));
        }
    }

    /// Drop every dependency subscription and consumer. Also runs on drop.
    pub fn close(&self) {
        let (ctx, deps, dep_cb) = {
            let mut inner = self.inner.borrow_mut();
            inner.consumers.clear();
            (inner.ctx.clone(), inner.deps.clone(), inner.dep_cb.take())
        };
        if let Some(dep_cb) = dep_cb {
            for dep in &deps {
                ctx.unobserve(dep, &dep_cb);
            }
        }
    }

    /// The canonical dependency paths this observer tracks.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.inner.borrow().deps.clone()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observer")
            .field("deps", &inner.deps)
            .field("consumers", &inner.consumers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
