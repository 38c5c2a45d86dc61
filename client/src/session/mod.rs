pub mod state;
pub mod timer;

pub use state::{Action, Effect, Event, Outcome, Session, SessionState};
pub use timer::ResetTimer;
