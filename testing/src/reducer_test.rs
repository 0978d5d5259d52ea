//! One-step reducer checks.
//!
//! [`ReducerTest`] feeds a single action to a reducer and hands the resulting
//! state and effects to closures. Reducers here mostly answer with keyed
//! timers and cancellations, so [`assertions`] looks timers up by
//! [`EffectId`](seatlock_core::effect::EffectId) rather than by position.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use seatlock_core::{effect::Effect, reducer::Reducer};

type StateAssertion<S> = Box<dyn FnOnce(&S)>;

type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// A single reduce call with checks on what it left behind
///
/// Checks run in the order they were added, state checks first.
///
/// # Example
///
/// ```ignore
/// use seatlock_testing::{ReducerTest, assertions};
///
/// // A ten minute hold is renewed 400 seconds in
/// ReducerTest::new(EngineReducer)
///     .with_env(env())
///     .given_state(locking(live_state(), "A1"))
///     .when_action(acquired("A1", 10))
///     .then_state(|state| assert!(state.cart.contains_key(&seat("A1"))))
///     .then_effects(|effects| {
///         let renew_in = assertions::timer_duration(effects, &renew_timer(&seat("A1")));
///         assert_eq!(renew_in, Some(Duration::from_secs(400)));
///         assertions::assert_schedules(effects, &expiry_timer(&seat("A1")));
///     })
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    S: Clone,
    A: Clone,
{
    /// Starts a check against `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Environment handed to `reduce`
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// State before the action
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// The one action to reduce
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Checks the state after the action
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Checks the effects the action returned
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Reduces the action and runs every check
    ///
    /// # Panics
    ///
    /// Panics when state, action or environment is missing, or when a check fails.
    #[allow(clippy::panic, clippy::expect_used)]
    pub fn run(self) {
        let mut state = self.initial_state.expect("given_state() not called");
        let action = self.action.expect("when_action() not called");
        let env = self.environment.expect("with_env() not called");

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Effect checks keyed by timer id
pub mod assertions {
    use seatlock_core::effect::{Effect, EffectId};
    use std::time::Duration;

    /// Nothing to run, not even a timer
    ///
    /// # Panics
    ///
    /// Panics on any effect other than a lone `Effect::None`.
    #[allow(clippy::panic)]
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.is_empty() || matches!(effects, [Effect::None]),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Exactly `expected` effects
    ///
    /// # Panics
    ///
    /// Panics on any other count.
    #[allow(clippy::panic)]
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// At least one request or other future went out
    ///
    /// # Panics
    ///
    /// Panics if there is no `Effect::Future`.
    #[allow(clippy::panic)]
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Delay of the timer registered under `id`, if any
    #[must_use]
    pub fn timer_duration<A>(effects: &[Effect<A>], id: &EffectId) -> Option<Duration> {
        effects.iter().find_map(|effect| match effect {
            Effect::Cancellable { id: key, effect } if key == id => match effect.as_ref() {
                Effect::Delay { duration, .. } => Some(*duration),
                _ => None,
            },
            _ => None,
        })
    }

    /// Something is registered under `id`
    ///
    /// # Panics
    ///
    /// Panics if no cancellable effect uses `id`.
    #[allow(clippy::panic)]
    pub fn assert_schedules<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            effects.iter().any(|e| e.cancellable_id() == Some(id)),
            "Expected an effect scheduled under {id}"
        );
    }

    /// The timer under `id` is cancelled
    ///
    /// # Panics
    ///
    /// Panics if no `Cancel` effect targets `id`.
    #[allow(clippy::panic)]
    pub fn assert_cancels<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, Effect::Cancel(key) if key == id)),
            "Expected {id} to be cancelled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatlock_core::effect::{Effect, EffectId};
    use seatlock_core::reducer::Reducer;
    use std::time::Duration;

    #[derive(Clone, Debug)]
    struct TestState {
        armed: bool,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Arm,
        Disarm,
        Fired,
    }

    struct TestReducer;

    struct TestEnv;

    fn alarm() -> EffectId {
        EffectId::new("alarm")
    }

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> seatlock_core::SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Arm => {
                    state.armed = true;
                    seatlock_core::smallvec![Effect::timer(alarm(), Duration::from_secs(30), TestAction::Fired)]
                },
                TestAction::Disarm => {
                    state.armed = false;
                    seatlock_core::smallvec![Effect::Cancel(alarm())]
                },
                TestAction::Fired => seatlock_core::smallvec![Effect::None],
            }
        }
    }

    #[test]
    fn arm_schedules_timer() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { armed: false })
            .when_action(TestAction::Arm)
            .then_state(|state| assert!(state.armed))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_schedules(effects, &alarm());
                assert_eq!(
                    assertions::timer_duration(effects, &alarm()),
                    Some(Duration::from_secs(30))
                );
            })
            .run();
    }

    #[test]
    fn disarm_cancels_timer() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { armed: true })
            .when_action(TestAction::Disarm)
            .then_state(|state| assert!(!state.armed))
            .then_effects(|effects| assertions::assert_cancels(effects, &alarm()))
            .run();
    }

    #[test]
    fn assertions_no_effects() {
        assertions::assert_no_effects::<TestAction>(&[Effect::None]);
        assertions::assert_no_effects::<TestAction>(&[]);
        assert_eq!(assertions::timer_duration::<TestAction>(&[], &alarm()), None);
    }
}
