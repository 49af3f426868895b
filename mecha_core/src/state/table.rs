//! Transition table construction and validation.
//!
//! A [`StateMachineBuilder`] collects rules, overrides, timeouts, and hooks,
//! then [`StateMachineBuilder::build`] checks the table once. Anything that
//! would make dispatch ambiguous is a programming error and fails here,
//! never at dispatch time.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use mecha_common::time::Timestamp;
use mecha_common::value::Context;

use crate::error::{ConfigError, GuardError};
use crate::state::machine::StateMachine;

/// Bounds shared by state and event identifiers.
///
/// Blanket-implemented; a fieldless `#[derive(Debug, Clone, Copy,
/// PartialEq, Eq, Hash)]` enum qualifies.
pub trait MachineKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> MachineKey for T {}

/// Predicate over device context. An `Err` counts as "not satisfied".
pub type Guard = Box<dyn Fn(&Context) -> Result<bool, GuardError> + Send + Sync>;

/// Entry or exit action.
pub type Hook<D> = Box<dyn FnMut(&mut D) + Send>;

/// Periodic action run by `tick` while a state is active.
pub type During<D> = Box<dyn FnMut(&mut D, Timestamp) + Send>;

pub(crate) struct Rule<S> {
    pub(crate) target: S,
    pub(crate) guard: Option<Guard>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeout<E> {
    pub(crate) after: Duration,
    pub(crate) event: E,
}

pub(crate) struct StateHooks<D> {
    pub(crate) on_enter: Vec<Hook<D>>,
    pub(crate) on_exit: Vec<Hook<D>>,
    pub(crate) during: Vec<During<D>>,
}

impl<D> Default for StateHooks<D> {
    fn default() -> Self {
        Self {
            on_enter: Vec::new(),
            on_exit: Vec::new(),
            during: Vec::new(),
        }
    }
}

/// Everything a built machine needs, validated.
pub(crate) struct Table<S, E, D> {
    pub(crate) rules: HashMap<(S, E), Rule<S>>,
    pub(crate) overrides: HashMap<E, S>,
    pub(crate) timeouts: HashMap<S, Timeout<E>>,
    pub(crate) hooks: HashMap<S, StateHooks<D>>,
}

/// Collects the definition of a [`StateMachine`].
///
/// Hooks for the same state and kind run in registration order.
pub struct StateMachineBuilder<S, E, D = ()> {
    initial: S,
    data: D,
    rules: Vec<(S, E, Rule<S>)>,
    overrides: Vec<(E, S)>,
    timeouts: Vec<(S, Timeout<E>)>,
    hooks: HashMap<S, StateHooks<D>>,
}

impl<S: MachineKey, E: MachineKey, D> StateMachineBuilder<S, E, D> {
    /// Start a definition with the initial state and the device data the
    /// hooks will mutate.
    pub fn new(initial: S, data: D) -> Self {
        Self {
            initial,
            data,
            rules: Vec::new(),
            overrides: Vec::new(),
            timeouts: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    /// Unconditional rule `from --event--> to`.
    pub fn rule(mut self, from: S, event: E, to: S) -> Self {
        self.rules.push((
            from,
            event,
            Rule {
                target: to,
                guard: None,
            },
        ));
        self
    }

    /// Rule that fires only when `guard` returns `Ok(true)`.
    pub fn guarded_rule<G>(mut self, from: S, event: E, to: S, guard: G) -> Self
    where
        G: Fn(&Context) -> Result<bool, GuardError> + Send + Sync + 'static,
    {
        self.rules.push((
            from,
            event,
            Rule {
                target: to,
                guard: Some(Box::new(guard)),
            },
        ));
        self
    }

    /// Override event: from any state, regardless of guards, go to
    /// `safety_state`.
    pub fn override_event(mut self, event: E, safety_state: S) -> Self {
        self.overrides.push((event, safety_state));
        self
    }

    /// After `after` in `state`, `tick` synthesizes `event`.
    pub fn timeout(mut self, state: S, after: Duration, event: E) -> Self {
        self.timeouts.push((state, Timeout { after, event }));
        self
    }

    pub fn on_enter<F>(mut self, state: S, hook: F) -> Self
    where
        F: FnMut(&mut D) + Send + 'static,
    {
        self.hooks
            .entry(state)
            .or_default()
            .on_enter
            .push(Box::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, state: S, hook: F) -> Self
    where
        F: FnMut(&mut D) + Send + 'static,
    {
        self.hooks
            .entry(state)
            .or_default()
            .on_exit
            .push(Box::new(hook));
        self
    }

    /// Periodic action run by every `tick` while `state` is active.
    pub fn during<F>(mut self, state: S, action: F) -> Self
    where
        F: FnMut(&mut D, Timestamp) + Send + 'static,
    {
        self.hooks
            .entry(state)
            .or_default()
            .during
            .push(Box::new(action));
        self
    }

    /// Validate the table and produce the machine.
    ///
    /// # Errors
    /// - `AmbiguousRule`: two rules for the same `(state, event)`
    /// - `DuplicateOverride`: an override event registered twice
    /// - `OverrideShadowsRule`: an override event also used by a rule
    /// - `DuplicateTimeout` / `ZeroTimeout`: bad timeout declarations
    /// - `TimeoutWithoutRule`: a timeout event nothing would handle
    pub fn build(self) -> Result<StateMachine<S, E, D>, ConfigError> {
        let mut overrides = HashMap::with_capacity(self.overrides.len());
        for (event, target) in self.overrides {
            if overrides.insert(event, target).is_some() {
                return Err(ConfigError::DuplicateOverride(format!("{event:?}")));
            }
        }

        let mut rules = HashMap::with_capacity(self.rules.len());
        for (from, event, rule) in self.rules {
            if overrides.contains_key(&event) {
                return Err(ConfigError::OverrideShadowsRule {
                    state: format!("{from:?}"),
                    event: format!("{event:?}"),
                });
            }
            match rules.entry((from, event)) {
                Entry::Occupied(_) => {
                    return Err(ConfigError::AmbiguousRule {
                        state: format!("{from:?}"),
                        event: format!("{event:?}"),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(rule);
                }
            }
        }

        let mut timeouts = HashMap::with_capacity(self.timeouts.len());
        for (state, timeout) in self.timeouts {
            if timeout.after.is_zero() {
                return Err(ConfigError::ZeroTimeout(format!("{state:?}")));
            }
            if !rules.contains_key(&(state, timeout.event)) && !overrides.contains_key(&timeout.event)
            {
                return Err(ConfigError::TimeoutWithoutRule {
                    state: format!("{state:?}"),
                    event: format!("{:?}", timeout.event),
                });
            }
            if timeouts.insert(state, timeout).is_some() {
                return Err(ConfigError::DuplicateTimeout(format!("{state:?}")));
            }
        }

        tracing::debug!(
            initial = ?self.initial,
            rules = rules.len(),
            overrides = overrides.len(),
            timeouts = timeouts.len(),
            "state machine table built"
        );

        Ok(StateMachine::from_table(
            self.initial,
            self.data,
            Table {
                rules,
                overrides,
                timeouts,
                hooks: self.hooks,
            },
        ))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
