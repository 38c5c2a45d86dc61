use face_gate_common::protocol::VerifyResult;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::presentation::{Status, View};

const EMPTY_NAME_ALERT: &str = "Please enter a name before registering.";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Verify,
    Register { name: String },
}

/// How a submitted action ended, as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Verified(VerifyResult),
    Registered { message: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Waiting for the camera to deliver its first frame.
    Initializing,
    Ready,
    Busy(Action),
    ResultShown,
    /// Camera acquisition failed; nothing can be captured until restart.
    CameraUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CameraReady { width: u32, height: u32 },
    CameraFailed { reason: String },
    NameEdited(String),
    VerifyPressed,
    RegisterPressed,
    /// The first frame of the in-flight action has been captured.
    FrameCaptured { label: String },
    Completed(Outcome),
    ResetElapsed { ticket: u64 },
    /// Skip the rest of the result delay.
    Dismissed,
}

/// Work the driver must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Submit(Action),
    ScheduleReset { ticket: u64, after: Duration },
    CancelReset,
    Alert(String),
}

/// The whole client-side session as one value.
///
/// Every change goes through [`Session::handle`]; the session never performs
/// I/O itself, it only returns the effects the driver has to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    state: SessionState,
    status: Status,
    view: View,
    name_input: String,
    reset_ticket: u64,
    reset_delay: Duration,
    freeze_on_verify: bool,
}

impl Session {
    pub fn new(reset_delay: Duration, freeze_on_verify: bool) -> Self {
        Self {
            state: SessionState::Initializing,
            status: Status::starting(),
            view: View::Live,
            name_input: String::new(),
            reset_ticket: 0,
            reset_delay,
            freeze_on_verify,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn name_input(&self) -> &str {
        &self.name_input
    }

    /// Verify button, register button and name input share this flag.
    pub fn controls_enabled(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::CameraReady { width, height } => {
                if self.state == SessionState::Initializing {
                    info!(width, height, "session ready");
                    self.enter_ready();
                }
                Vec::new()
            }
            Event::CameraFailed { reason } => {
                if self.state == SessionState::Initializing {
                    self.state = SessionState::CameraUnavailable;
                    self.status = Status::error(&reason);
                }
                Vec::new()
            }
            Event::NameEdited(name) => {
                if self.controls_enabled() {
                    self.name_input = name;
                } else {
                    debug!(state = ?self.state, "name input is disabled");
                }
                Vec::new()
            }
            Event::VerifyPressed => {
                if !self.admit("verify") {
                    return Vec::new();
                }
                self.begin(Action::Verify, Status::verifying())
            }
            Event::RegisterPressed => {
                if !self.admit("register") {
                    return Vec::new();
                }
                let name = self.name_input.trim().to_string();
                if name.is_empty() {
                    return vec![Effect::Alert(EMPTY_NAME_ALERT.into())];
                }
                let status = Status::registering(&name);
                self.begin(Action::Register { name }, status)
            }
            Event::FrameCaptured { label } => {
                if self.freeze_on_verify && self.state == SessionState::Busy(Action::Verify) {
                    self.view = View::Frozen { label };
                }
                Vec::new()
            }
            Event::Completed(outcome) => self.complete(outcome),
            Event::ResetElapsed { ticket } => {
                if self.state == SessionState::ResultShown && ticket == self.reset_ticket {
                    self.enter_ready();
                } else {
                    debug!(ticket, current = self.reset_ticket, "ignoring stale reset");
                }
                Vec::new()
            }
            Event::Dismissed => {
                if self.state != SessionState::ResultShown {
                    return Vec::new();
                }
                self.enter_ready();
                vec![Effect::CancelReset]
            }
        }
    }

    /// Single-request admission gate: triggers only count while Ready.
    fn admit(&self, trigger: &str) -> bool {
        if self.controls_enabled() {
            return true;
        }
        debug!(trigger, state = ?self.state, "trigger rejected, controls disabled");
        false
    }

    fn begin(&mut self, action: Action, status: Status) -> Vec<Effect> {
        self.state = SessionState::Busy(action.clone());
        self.status = status;
        vec![Effect::Submit(action)]
    }

    fn complete(&mut self, outcome: Outcome) -> Vec<Effect> {
        let SessionState::Busy(action) = &self.state else {
            warn!(state = ?self.state, "completion without an action in flight");
            return Vec::new();
        };
        let mut effects = Vec::new();

        match (action, outcome) {
            (_, Outcome::Verified(result)) => self.status = Status::verified(&result),
            (_, Outcome::Registered { message }) => {
                self.status = Status::registered(&message);
                effects.push(Effect::Alert(message));
            }
            (Action::Register { .. }, Outcome::Failed { reason }) => {
                self.status = Status::error(&reason);
                effects.push(Effect::Alert(format!("Registration failed: {reason}")));
            }
            (Action::Verify, Outcome::Failed { reason }) => self.status = Status::error(&reason),
        }
        if matches!(action, Action::Register { .. }) {
            self.name_input.clear();
        }

        self.state = SessionState::ResultShown;
        self.reset_ticket += 1;
        effects.push(Effect::ScheduleReset {
            ticket: self.reset_ticket,
            after: self.reset_delay,
        });
        effects
    }

    fn enter_ready(&mut self) {
        self.state = SessionState::Ready;
        self.status = Status::ready();
        self.view = View::Live;
    }
}
