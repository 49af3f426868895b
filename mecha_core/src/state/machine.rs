//! Supervisory state machine runtime.
//!
//! Dispatch order for every event:
//! 1. Override events (state-independent, guard-free) → designated safety state.
//! 2. Rule lookup for `(current, event)`, guard evaluated against the context.
//! 3. No rule, guard rejected, or guard unevaluable → `Ignored`, no mutation.
//!
//! A transition runs exit hooks of the old state, swaps the state, then runs
//! entry hooks of the new one. `&mut self` keeps this atomic: hooks receive
//! only the device data and cannot re-enter the machine.

use std::collections::HashMap;
use std::time::Duration;

use heapless::Deque;
use mecha_common::consts::TRANSITION_HISTORY_LEN;
use mecha_common::time::Timestamp;
use mecha_common::value::Context;
use static_assertions::assert_impl_all;

use crate::state::table::{MachineKey, Rule, StateHooks, Table, Timeout};

/// Why an event left the machine unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No rule for `(state, event)` and the event is not an override.
    NoRule,
    /// The rule's guard returned `false`.
    GuardRejected,
    /// The guard could not be evaluated against the given context.
    GuardUnevaluable,
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome<S> {
    /// An ordinary rule fired.
    Transitioned { from: S, to: S },
    /// An override event forced the safety state.
    Overridden { from: S, to: S },
    /// Nothing happened.
    Ignored { state: S, reason: IgnoreReason },
}

impl<S: Copy> TransitionOutcome<S> {
    /// True for `Transitioned` and `Overridden`.
    #[inline]
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }

    /// State active before the event.
    #[inline]
    pub fn previous(&self) -> S {
        match *self {
            Self::Transitioned { from, .. } | Self::Overridden { from, .. } => from,
            Self::Ignored { state, .. } => state,
        }
    }

    /// State active after the event.
    #[inline]
    pub fn current(&self) -> S {
        match *self {
            Self::Transitioned { to, .. } | Self::Overridden { to, .. } => to,
            Self::Ignored { state, .. } => state,
        }
    }
}

/// What caused a recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Event,
    Override,
    Timeout,
}

/// One entry of the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
    pub cause: TransitionCause,
    /// Known only when the caller supplied a time (`handle_event_at`, `tick`).
    pub at: Option<Timestamp>,
}

/// Finite-state supervisory controller.
///
/// `S`: state identifiers, `E`: events, `D`: device data owned by the
/// machine and mutated by hooks (emergency flags, an embedded PID
/// regulator, actuator commands).
///
/// The initial state's entry hooks are not run at construction.
pub struct StateMachine<S, E, D = ()> {
    current: S,
    data: D,
    rules: HashMap<(S, E), Rule<S>>,
    overrides: HashMap<E, S>,
    timeouts: HashMap<S, Timeout<E>>,
    hooks: HashMap<S, StateHooks<D>>,
    /// When the current state was entered; stamped lazily by the first
    /// `tick` if the transition carried no time.
    entered_at: Option<Timestamp>,
    history: Deque<TransitionRecord<S, E>, TRANSITION_HISTORY_LEN>,
    transition_count: u64,
}

impl<S: MachineKey, E: MachineKey, D> StateMachine<S, E, D> {
    pub(crate) fn from_table(initial: S, data: D, table: Table<S, E, D>) -> Self {
        Self {
            current: initial,
            data,
            rules: table.rules,
            overrides: table.overrides,
            timeouts: table.timeouts,
            hooks: table.hooks,
            entered_at: None,
            history: Deque::new(),
            transition_count: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> S {
        self.current
    }

    #[inline]
    pub fn is_in(&self, state: S) -> bool {
        self.current == state
    }

    #[inline]
    pub fn data(&self) -> &D {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Whether `event` is an override event.
    #[inline]
    pub fn is_override(&self, event: E) -> bool {
        self.overrides.contains_key(&event)
    }

    /// Time spent in the current state, if its entry time is known.
    pub fn time_in_state(&self, now: Timestamp) -> Option<Duration> {
        self.entered_at.map(|t| now.saturating_since(t))
    }

    /// Total transitions performed (overrides and self-transitions included).
    #[inline]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord<S, E>> {
        self.history.iter()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord<S, E>> {
        self.history.back()
    }

    /// Dispatch an event without a timestamp. Any timeout of the new state
    /// starts counting at the next `tick`.
    pub fn handle_event(&mut self, event: E, ctx: &Context) -> TransitionOutcome<S> {
        self.dispatch(event, ctx, None, TransitionCause::Event)
    }

    /// Dispatch an event that happened at `now`.
    pub fn handle_event_at(&mut self, event: E, ctx: &Context, now: Timestamp) -> TransitionOutcome<S> {
        self.dispatch(event, ctx, Some(now), TransitionCause::Event)
    }

    /// Time-based step with an empty context.
    ///
    /// See [`StateMachine::tick_with`].
    pub fn tick(&mut self, now: Timestamp) -> Option<TransitionOutcome<S>> {
        self.tick_with(now, &Context::new())
    }

    /// Time-based step.
    ///
    /// If the current state declares a timeout that has elapsed, its event
    /// is dispatched through the ordinary algorithm (guards included) and
    /// the outcome is returned. Then the `during` actions of the state that
    /// is active afterwards run with `now`.
    ///
    /// Returns `None` when no timeout was due.
    pub fn tick_with(&mut self, now: Timestamp, ctx: &Context) -> Option<TransitionOutcome<S>> {
        let entered = *self.entered_at.get_or_insert(now);

        let due = self
            .timeouts
            .get(&self.current)
            .filter(|t| now.saturating_since(entered) >= t.after)
            .map(|t| t.event);

        let outcome = due.map(|event| self.dispatch(event, ctx, Some(now), TransitionCause::Timeout));

        if let Some(hooks) = self.hooks.get_mut(&self.current) {
            for action in hooks.during.iter_mut() {
                action(&mut self.data, now);
            }
        }

        outcome
    }

    fn dispatch(
        &mut self,
        event: E,
        ctx: &Context,
        now: Option<Timestamp>,
        cause: TransitionCause,
    ) -> TransitionOutcome<S> {
        let from = self.current;

        // Overrides first, independent of state and guards.
        if let Some(&target) = self.overrides.get(&event) {
            tracing::warn!(?from, ?event, to = ?target, "override transition");
            let cause = match cause {
                TransitionCause::Timeout => TransitionCause::Timeout,
                _ => TransitionCause::Override,
            };
            self.switch(event, target, now, cause);
            return TransitionOutcome::Overridden { from, to: target };
        }

        let Some(rule) = self.rules.get(&(from, event)) else {
            tracing::trace!(state = ?from, ?event, "event ignored: no rule");
            return TransitionOutcome::Ignored {
                state: from,
                reason: IgnoreReason::NoRule,
            };
        };

        if let Some(guard) = &rule.guard {
            match guard(ctx) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(state = ?from, ?event, "event ignored: guard rejected");
                    return TransitionOutcome::Ignored {
                        state: from,
                        reason: IgnoreReason::GuardRejected,
                    };
                }
                Err(e) => {
                    tracing::debug!(state = ?from, ?event, error = %e, "event ignored: guard unevaluable");
                    return TransitionOutcome::Ignored {
                        state: from,
                        reason: IgnoreReason::GuardUnevaluable,
                    };
                }
            }
        }

        let target = rule.target;
        self.switch(event, target, now, cause);
        TransitionOutcome::Transitioned { from, to: target }
    }

    /// Exit → swap → entry, then bookkeeping.
    fn switch(&mut self, event: E, target: S, now: Option<Timestamp>, cause: TransitionCause) {
        let from = self.current;

        if let Some(hooks) = self.hooks.get_mut(&from) {
            for hook in hooks.on_exit.iter_mut() {
                hook(&mut self.data);
            }
        }

        self.current = target;

        if let Some(hooks) = self.hooks.get_mut(&target) {
            for hook in hooks.on_enter.iter_mut() {
                hook(&mut self.data);
            }
        }

        self.entered_at = now;
        self.transition_count += 1;

        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(TransitionRecord {
            from,
            to: target,
            event,
            cause,
            at: now,
        });

        tracing::debug!(?from, to = ?target, ?event, ?cause, "state transition");
    }
}

impl<S: std::fmt::Debug, E, D> std::fmt::Debug for StateMachine<S, E, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("entered_at", &self.entered_at)
            .field("rules", &self.rules.len())
            .field("overrides", &self.overrides.len())
            .field("transition_count", &self.transition_count)
            .finish_non_exhaustive()
    }
}

assert_impl_all!(StateMachine<u8, u8, ()>: Send);

// ─── Tests ──────────────────────────────────────────────────────────
