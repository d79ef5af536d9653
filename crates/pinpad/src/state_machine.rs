use crate::collector::Collector;
use pinpad_core::config::{Config, TimingConfig};
use pinpad_core::keypad::{Key, PIN_LENGTH};
use pinpad_core::record::AttemptRecord;
use pinpad_core::view::{Feedback, Phase, View};
use std::time::Instant;
use tracing::{debug, info};

/// A delayed transition waiting for its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// First entry done: clear the dots and ask for confirmation.
    BeginConfirm,
    /// Mismatch shown long enough: start over.
    ResetAfterMismatch,
    /// Match shown long enough: leave for the success page.
    Navigate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    transition: Transition,
    due: Instant,
}

/// Actions that the state machine wants the caller to perform.
#[derive(Debug)]
pub enum Action {
    /// Hand the attempt to the sink. Best effort: the caller must not wait
    /// on the write before continuing.
    Record(AttemptRecord),
    /// Push a new view to displays.
    Render(View),
    /// Redirect displays to the success target.
    Navigate(String),
}

/// Two-phase PIN sequencer: enter, confirm, compare.
///
/// Delayed transitions are held as a single [`Pending`] value. The caller
/// sleeps until [`next_deadline`](Self::next_deadline) and then calls
/// [`check_timer`](Self::check_timer); dropping the session through
/// [`cancel_pending`](Self::cancel_pending) or [`reset`](Self::reset)
/// guarantees the transition never fires.
pub struct StateMachine {
    pin: Collector,
    first_pin: Option<String>,
    phase: Phase,
    feedback: Feedback,
    pending: Option<Pending>,
    timing: TimingConfig,
    confirm_prompt: String,
    success_target: String,
}

impl StateMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            pin: Collector::new(),
            first_pin: None,
            phase: Phase::Entering,
            feedback: Feedback::Idle,
            pending: None,
            timing: config.timing.clone(),
            confirm_prompt: config.prompt.confirm.clone(),
            success_target: config.navigation.success_target.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn feedback(&self) -> Feedback {
        self.feedback
    }

    pub fn pin_len(&self) -> usize {
        self.pin.len()
    }

    #[cfg(test)]
    fn first_pin(&self) -> Option<&str> {
        self.first_pin.as_deref()
    }

    /// Keys are refused while a completed entry waits for its transition,
    /// and for good once the PIN is confirmed.
    pub fn input_disabled(&self) -> bool {
        self.pin.is_full() || self.feedback == Feedback::Success
    }

    pub fn view(&self) -> View {
        let prompt = match self.phase {
            Phase::Entering => None,
            Phase::Confirming | Phase::Succeeded => Some(self.confirm_prompt.clone()),
        };
        View {
            filled: self.pin.len(),
            length: PIN_LENGTH,
            feedback: self.feedback,
            phase: self.phase,
            prompt,
        }
    }

    /// Process a keypad token, returning actions for the caller.
    pub fn process_key(&mut self, key: Key) -> Vec<Action> {
        // A key during the mismatch display dismisses it: the pending reset
        // is applied now and the key lands on a fresh session.
        let dismissed = self.dismiss_error();

        if self.input_disabled() {
            debug!(key = %key, phase = ?self.phase, "key rejected: input disabled");
            return Vec::new();
        }

        let changed = match key {
            Key::Digit(digit) => self.pin.push(digit),
            Key::Backspace => self.pin.pop(),
        };
        if !changed && !dismissed {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.pin.is_full() {
            actions.extend(self.on_complete());
        }
        actions.push(Action::Render(self.view()));
        actions
    }

    /// Fire the pending transition if its deadline has passed.
    pub fn check_timer(&mut self) -> Vec<Action> {
        self.check_timer_at(Instant::now())
    }

    fn check_timer_at(&mut self, now: Instant) -> Vec<Action> {
        let Some(pending) = self.pending else {
            return Vec::new();
        };
        if now < pending.due {
            return Vec::new();
        }
        self.pending = None;

        match pending.transition {
            Transition::BeginConfirm => {
                debug!("confirm delay elapsed, asking for confirmation");
                self.pin.clear();
                self.phase = Phase::Confirming;
                vec![Action::Render(self.view())]
            }
            Transition::ResetAfterMismatch => {
                debug!("error display elapsed, starting over");
                self.clear_session();
                vec![Action::Render(self.view())]
            }
            Transition::Navigate => {
                debug!(destination = %self.success_target, "success delay elapsed");
                vec![Action::Navigate(self.success_target.clone())]
            }
        }
    }

    /// Return the `Instant` at which `check_timer()` needs to run, or `None`
    /// if nothing is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Drop the scheduled transition without running it. Returns whether
    /// one was pending.
    pub fn cancel_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Abandon the current session and start again from an empty entry.
    pub fn reset(&mut self) -> Vec<Action> {
        if self.cancel_pending() {
            debug!("reset cancelled a pending transition");
        }
        self.clear_session();
        vec![Action::Render(self.view())]
    }

    fn on_complete(&mut self) -> Vec<Action> {
        let pin = self.pin.as_str().to_string();
        let step = self.phase.step();
        match self.phase {
            Phase::Entering => {
                info!("PIN entered, waiting for confirmation");
                self.first_pin = Some(pin.clone());
                self.schedule(Transition::BeginConfirm, self.timing.confirm_delay());
                vec![Action::Record(AttemptRecord::new(pin, step, None))]
            }
            Phase::Confirming => {
                let matched = self.first_pin.as_deref() == Some(pin.as_str());
                if matched {
                    info!("PIN confirmed");
                    self.feedback = Feedback::Success;
                    self.phase = Phase::Succeeded;
                    self.schedule(Transition::Navigate, self.timing.success_redirect());
                } else {
                    info!("PIN confirmation mismatch");
                    self.feedback = Feedback::Error;
                    self.schedule(Transition::ResetAfterMismatch, self.timing.error_reset());
                }
                vec![Action::Record(AttemptRecord::new(pin, step, Some(matched)))]
            }
            Phase::Succeeded => Vec::new(),
        }
    }

    fn dismiss_error(&mut self) -> bool {
        if self.feedback != Feedback::Error {
            return false;
        }
        if let Some(Pending {
            transition: Transition::ResetAfterMismatch,
            ..
        }) = self.pending
        {
            debug!("error dismissed by keypress");
            self.pending = None;
            self.clear_session();
        } else {
            self.feedback = Feedback::Idle;
        }
        true
    }

    fn schedule(&mut self, transition: Transition, delay: std::time::Duration) {
        self.pending = Some(Pending {
            transition,
            due: Instant::now() + delay,
        });
    }

    fn clear_session(&mut self) {
        self.pin.clear();
        self.first_pin = None;
        self.feedback = Feedback::Idle;
        self.phase = Phase::Entering;
    }
}
