//! Hierarchical state processor (spec.md §4.9 C9).
//!
//! Mirrors the record split spec.md draws between a [`State`] (a function
//! plus the data it runs against) and a [`Transition`] (a function that
//! inspects the state that just ran and decides what runs next): "State =
//! { function, data }; Transition = { function, data }. The transition is
//! invoked after every state's function returns and yields the next
//! state." [`run`] drives that loop until a transition yields a `State`
//! with no function — the "null next-state function" terminal condition —
//! and keeps a [`CurrentStateHandle`] current-state accessor up to date for
//! whatever else in the process wants to know where the machine is.
//! [`attach`] is the "attached transition" combinator: it chains an
//! optional pre-transition and post-transition around a base transition
//! into the single slot the loop expects.

use std::sync::{Arc, Mutex};

/// A state's own behavior: mutates its data in place when the state
/// becomes current. `None` only ever appears on a `State` returned as the
/// next state of a [`Transition`] — it is the loop's terminal condition,
/// never something a running state transitions into itself.
pub type StateFn<S> = Box<dyn Fn(&mut S)>;

/// One step of the run loop (spec.md §4.9 step 1: "invoke
/// `current.function(current.data)`").
pub struct State<S> {
    pub function: Option<StateFn<S>>,
    pub data: S,
    /// Optional diagnostic name, surfaced through [`CurrentStateHandle`]
    /// while this state is executing.
    pub label: Option<&'static str>,
}

impl<S> State<S> {
    pub fn new(function: impl Fn(&mut S) + 'static, data: S) -> Self {
        State {
            function: Some(Box::new(function)),
            data,
            label: None,
        }
    }

    /// A state with no further transition; [`run`] stops here.
    pub fn terminal(data: S) -> Self {
        State {
            function: None,
            data,
            label: None,
        }
    }

    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

/// Computes the next [`State`] from the one that just ran (spec.md §4.9
/// step 2: "invoke `transition.function(current, &next, transition.data)`
/// — transition writes the next state"). Distinct from `State`: a state
/// executes against its own data, a transition decides what runs next. The
/// transition's own `data` is whatever its closure captures — the
/// idiomatic rendering of the C struct's `{ function, data }` pair.
pub struct Transition<S>(Box<dyn Fn(State<S>) -> State<S>>);

impl<S> Transition<S> {
    pub fn new(function: impl Fn(State<S>) -> State<S> + 'static) -> Self {
        Transition(Box::new(function))
    }

    fn compute(&self, current: State<S>) -> State<S> {
        (self.0)(current)
    }
}

/// A shared, externally-queryable view of whichever state is currently
/// executing — the "current-state accessor" the overview lists among the
/// HSP's runtime integration points. `run` refreshes it immediately before
/// invoking each state's function; any other code running alongside the
/// loop (a log line, a diagnostic endpoint, a signal handler deciding
/// whether it's safe to act) can read it at any time without touching the
/// loop itself.
#[derive(Clone, Default)]
pub struct CurrentStateHandle(Arc<Mutex<Option<&'static str>>>);

impl CurrentStateHandle {
    pub fn new() -> Self {
        CurrentStateHandle(Arc::new(Mutex::new(None)))
    }

    /// The label of whichever state is executing right now, or `None`
    /// before the first state has run or once the loop has stopped.
    pub fn get(&self) -> Option<&'static str> {
        *self.0.lock().unwrap()
    }

    fn set(&self, label: Option<&'static str>) {
        *self.0.lock().unwrap() = label;
    }
}

/// Runs `current` under `transition` until a transition-produced `State`
/// has no `function`, returning the final payload (spec.md §4.9).
/// `cursor` is updated to `current`'s label before every function
/// invocation and cleared once the loop stops.
pub fn run<S>(mut current: State<S>, transition: &Transition<S>, cursor: &CurrentStateHandle) -> S {
    loop {
        cursor.set(current.label);
        match current.function.take() {
            Some(function) => {
                function(&mut current.data);
                current.function = Some(function);
            }
            None => {
                cursor.set(None);
                return current.data;
            }
        }
        current = transition.compute(current);
    }
}

/// Chains an optional `pre` and optional `post` transition around `base`
/// into the single transition slot the loop expects (spec.md §4.9
/// "attached transition"): `pre` runs before `base` decides the next
/// state, `post` runs after — both operating on the same kind of
/// `State -> State` step `base` itself is, so any of the three can swap in
/// a wholly different next state, not just tweak its payload.
pub fn attach<S: 'static>(pre: Option<Transition<S>>, base: Transition<S>, post: Option<Transition<S>>) -> Transition<S> {
    Transition::new(move |current: State<S>| {
        let before_base = match &pre {
            Some(pre) => pre.compute(current),
            None => current,
        };
        let next = base.compute(before_base);
        match &post {
            Some(post) => post.compute(next),
            None => next,
        }
    })
}
