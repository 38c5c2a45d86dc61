use face_gate_common::config::SessionConfig;
use face_gate_common::frame::Frame;
use futures_util::StreamExt;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capture::{CameraError, CaptureController};
use crate::dispatch::Dispatcher;
use crate::presentation::Presenter;
use crate::session::{Action, Effect, Event, Outcome, ResetTimer, Session, SessionState};

const HELP: &str = "\
commands:
  verify            capture and verify the current face
  name <text>       set the name input
  register [name]   capture and register the face under the name input
  dismiss           skip the remaining result delay
  status            show the current status
  help              show this help
  quit              exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Verify,
    Register(Option<String>),
    Name(String),
    Dismiss,
    Status,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `help` for a list")]
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word.to_ascii_lowercase().as_str() {
        "verify" | "v" => Command::Verify,
        "register" | "r" => Command::Register((!rest.is_empty()).then(|| rest.to_string())),
        "name" => Command::Name(rest.to_string()),
        "dismiss" | "d" => Command::Dismiss,
        "status" | "s" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

/// Everything the driver loop reacts to.
#[derive(Debug)]
pub enum AppMessage {
    Line(String),
    InputClosed,
    Session(Event),
}

/// Capture parameters for submitted actions.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub verify_frames: usize,
    pub verify_interval: Duration,
    pub snapshot_path: Option<PathBuf>,
}

impl From<&SessionConfig> for CaptureSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            verify_frames: config.verify_frames,
            verify_interval: config.verify_frame_interval(),
            snapshot_path: config.snapshot_path.clone(),
        }
    }
}

/// Capture the frames an action needs and submit them.
///
/// Never fails: every error becomes [`Outcome::Failed`] so the session can
/// show it and reset.
pub async fn perform(
    action: Action,
    camera: Option<Arc<CaptureController>>,
    dispatcher: Arc<Dispatcher>,
    settings: CaptureSettings,
    tx: mpsc::UnboundedSender<AppMessage>,
) -> Outcome {
    let Some(camera) = camera else {
        return failed("camera is not available");
    };

    match action {
        Action::Verify => {
            let frames = match capture_for_verify(&camera, &settings, &tx).await {
                Ok(frames) => frames,
                Err(e) => return failed(e),
            };
            info!(frames = frames.len(), "submitting verify");
            match dispatcher.verify(&frames).await {
                Ok(result) => Outcome::Verified(result),
                Err(e) => failed(e),
            }
        }
        Action::Register { name } => {
            let frame = match camera.capture_frame().await {
                Ok(frame) => frame,
                Err(e) => return failed(e),
            };
            notify_captured(&tx, &frame);
            info!(name, bytes = frame.payload_size(), "submitting register");
            match dispatcher.register(&name, &frame).await {
                Ok(message) => Outcome::Registered { message },
                Err(e) => failed(e),
            }
        }
    }
}

async fn capture_for_verify(
    camera: &CaptureController,
    settings: &CaptureSettings,
    tx: &mpsc::UnboundedSender<AppMessage>,
) -> Result<Vec<Frame>, CameraError> {
    let mut stream =
        std::pin::pin!(camera.capture_frames(settings.verify_frames, settings.verify_interval));
    let mut frames = Vec::with_capacity(settings.verify_frames);

    while let Some(frame) = stream.next().await {
        let frame = frame?;
        if frames.is_empty() {
            notify_captured(tx, &frame);
            if let Some(path) = &settings.snapshot_path {
                if let Err(e) = tokio::fs::write(path, &frame.jpeg).await {
                    warn!(error = %e, path = %path.display(), "failed to save snapshot");
                }
            }
        }
        frames.push(frame);
    }

    Ok(frames)
}

fn notify_captured(tx: &mpsc::UnboundedSender<AppMessage>, frame: &Frame) {
    debug!(seq = frame.seq, bytes = frame.payload_size(), "frame captured");
    let _ = tx.send(AppMessage::Session(Event::FrameCaptured {
        label: frame.label(),
    }));
}

fn failed(reason: impl Display) -> Outcome {
    let reason = reason.to_string();
    error!(reason, "action failed");
    Outcome::Failed { reason }
}

/// Read stdin lines on a detached OS thread so `quit` never waits on a
/// blocked read.
pub fn spawn_input_reader(tx: mpsc::UnboundedSender<AppMessage>) -> io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(AppMessage::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        break;
                    }
                }
            }
            let _ = tx.send(AppMessage::InputClosed);
        })?;
    Ok(())
}

/// The single owner of the session; everything else talks to it by message.
pub struct App<W: Write> {
    session: Session,
    presenter: Presenter<W>,
    camera: Option<Arc<CaptureController>>,
    dispatcher: Arc<Dispatcher>,
    settings: CaptureSettings,
    timer: ResetTimer,
    input_closed: bool,
    tx: mpsc::UnboundedSender<AppMessage>,
    rx: mpsc::UnboundedReceiver<AppMessage>,
}

impl<W: Write> App<W> {
    pub fn new(config: &SessionConfig, dispatcher: Dispatcher, presenter: Presenter<W>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(config.reset_delay(), config.freeze_on_verify),
            presenter,
            camera: None,
            dispatcher: Arc::new(dispatcher),
            settings: CaptureSettings::from(config),
            timer: ResetTimer::new(),
            input_closed: false,
            tx,
            rx,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppMessage> {
        self.tx.clone()
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn render(&mut self) -> io::Result<()> {
        self.presenter.render(&self.session)
    }

    /// Hand over the result of camera acquisition.
    pub fn attach_camera(&mut self, camera: Result<CaptureController, CameraError>) -> io::Result<()> {
        match camera {
            Ok(camera) => {
                let (width, height) = camera.dimensions();
                self.camera = Some(Arc::new(camera));
                self.apply(Event::CameraReady { width, height })
            }
            Err(e) => {
                error!(error = %e, "camera acquisition failed");
                self.apply(Event::CameraFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        self.presenter.line(HELP)?;
        while let Some(message) = self.rx.recv().await {
            if !self.step(message)? {
                break;
            }
        }
        self.timer.cancel();
        info!("face-gate client stopped");
        Ok(())
    }

    /// Handle one message. Returns `false` once the app should exit.
    pub fn step(&mut self, message: AppMessage) -> io::Result<bool> {
        match message {
            AppMessage::Session(event) => self.apply(event)?,
            AppMessage::InputClosed => {
                debug!("input closed, exiting once idle");
                self.input_closed = true;
            }
            AppMessage::Line(line) => match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => return Ok(false),
                Ok(Some(command)) => self.command(command)?,
                Err(e) => self.presenter.line(&e.to_string())?,
            },
        }
        Ok(!(self.input_closed && self.is_idle()))
    }

    fn is_idle(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::Ready | SessionState::CameraUnavailable
        )
    }

    fn command(&mut self, command: Command) -> io::Result<()> {
        match command {
            Command::Verify => self.trigger(Event::VerifyPressed),
            Command::Register(name) => {
                if let Some(name) = name {
                    self.apply(Event::NameEdited(name))?;
                }
                self.trigger(Event::RegisterPressed)
            }
            Command::Name(name) => self.apply(Event::NameEdited(name)),
            Command::Dismiss => self.apply(Event::Dismissed),
            Command::Status => self.render(),
            Command::Help => self.presenter.line(HELP),
            Command::Quit => Ok(()),
        }
    }

    /// Like `apply`, but tells the user when the controls ignored the press.
    fn trigger(&mut self, event: Event) -> io::Result<()> {
        if !self.session.controls_enabled() {
            return self.presenter.line("Controls are disabled, please wait.");
        }
        self.apply(event)
    }

    fn apply(&mut self, event: Event) -> io::Result<()> {
        let before = self.session.clone();
        let effects = self.session.handle(event);
        for effect in effects {
            self.execute(effect)?;
        }
        if self.session != before {
            self.render()?;
        }
        Ok(())
    }

    fn execute(&mut self, effect: Effect) -> io::Result<()> {
        match effect {
            Effect::Submit(action) => {
                let camera = self.camera.clone();
                let dispatcher = Arc::clone(&self.dispatcher);
                let settings = self.settings.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = perform(action, camera, dispatcher, settings, tx.clone()).await;
                    let _ = tx.send(AppMessage::Session(Event::Completed(outcome)));
                });
                Ok(())
            }
            Effect::ScheduleReset { ticket, after } => {
                self.timer.schedule(
                    after,
                    self.tx.clone(),
                    AppMessage::Session(Event::ResetElapsed { ticket }),
                );
                Ok(())
            }
            Effect::CancelReset => {
                self.timer.cancel();
                Ok(())
            }
            Effect::Alert(message) => self.presenter.alert(&message),
        }
    }

    #[cfg(test)]
    async fn next_message(&mut self) -> Option<AppMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
impl App<Vec<u8>> {
    fn output(&self) -> String {
        String::from_utf8_lossy(self.presenter.get_ref()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::test_controller;
    use crate::dispatch::tests::{service_config, spawn_service, MockService};
    use serde_json::json;

    fn session_config(reset_delay_ms: u64) -> SessionConfig {
        SessionConfig {
            reset_delay_ms,
            verify_frames: 1,
            verify_frame_interval_ms: 10,
            ..SessionConfig::default()
        }
    }

    async fn app_with(mock: Arc<MockService>, reset_delay_ms: u64) -> App<Vec<u8>> {
        let base = spawn_service(mock).await;
        let dispatcher = Dispatcher::new(&service_config(&base)).unwrap();
        let mut app = App::new(
            &session_config(reset_delay_ms),
            dispatcher,
            Presenter::new(Vec::new(), false),
        );
        // The last live frame stays readable after the feed's sender is gone
        let (camera, _feed) = test_controller(32, 24).await;
        app.attach_camera(Ok(camera)).unwrap();
        app
    }

    /// Pump messages until the session is back in `Ready`.
    async fn run_until_ready(app: &mut App<Vec<u8>>) {
        while app.session().state() != &SessionState::Ready {
            let message = app.next_message().await.unwrap();
            assert!(app.step(message).unwrap());
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  ").unwrap(), None);
        assert_eq!(parse_command("verify").unwrap(), Some(Command::Verify));
        assert_eq!(parse_command("V").unwrap(), Some(Command::Verify));
        assert_eq!(parse_command("register").unwrap(), Some(Command::Register(None)));
        assert_eq!(
            parse_command("register  Ada Lovelace ").unwrap(),
            Some(Command::Register(Some("Ada Lovelace".into())))
        );
        assert_eq!(parse_command("name").unwrap(), Some(Command::Name(String::new())));
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert!(matches!(parse_command("dance"), Err(CommandError::Unknown(w)) if w == "dance"));
    }

    #[tokio::test]
    async fn verify_shows_match_then_returns_to_ready() {
        let mock = MockService::new(
            (200, json!({ "name": "Ada", "match_percentage": 87.34 })),
            (200, json!({})),
        );
        let mut app = app_with(mock.clone(), 20).await;

        assert!(app.step(AppMessage::Line("verify".into())).unwrap());
        assert!(!app.session().controls_enabled());
        run_until_ready(&mut app).await;

        let out = app.output();
        let verifying = out.find("Status: Verifying...").unwrap();
        let success = out.find("Status: Success! Welcome, Ada (87.3% Match)").unwrap();
        let ready = out.rfind("Status: Ready").unwrap();
        assert!(verifying < success && success < ready);
        assert!(out.contains("view: frozen #000000 32x24"));
        assert!(app.session().controls_enabled());

        let received = mock.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1["frames"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verify_error_detail_is_rendered() {
        let mock = MockService::new((422, json!({ "detail": "bad frame" })), (200, json!({})));
        let mut app = app_with(mock, 10).await;

        app.step(AppMessage::Line("verify".into())).unwrap();
        run_until_ready(&mut app).await;
        assert!(app.output().contains("Status: Error: bad frame"));
    }

    #[tokio::test]
    async fn register_posts_once_and_alerts() {
        let mock = MockService::new(
            (200, json!({})),
            (200, json!({ "message": "User Ada registered successfully." })),
        );
        let mut app = app_with(mock.clone(), 10).await;

        app.step(AppMessage::Line("register Ada".into())).unwrap();
        assert_eq!(
            app.session().state(),
            &SessionState::Busy(Action::Register { name: "Ada".into() })
        );
        run_until_ready(&mut app).await;

        let out = app.output();
        assert!(out.contains("Status: Registering Ada..."));
        assert!(out.contains("! User Ada registered successfully. !"));
        assert_eq!(app.session().name_input(), "");

        let received = mock.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "register");
        assert_eq!(received[0].1["name"], "Ada");
    }

    #[tokio::test]
    async fn register_without_name_stays_local() {
        let mock = MockService::new((200, json!({})), (200, json!({ "message": "ok" })));
        let mut app = app_with(mock.clone(), 10).await;

        app.step(AppMessage::Line("register".into())).unwrap();
        assert_eq!(app.session().state(), &SessionState::Ready);
        assert!(app.output().contains("! Please enter a name before registering. !"));
        assert!(mock.received().is_empty());
    }

    #[tokio::test]
    async fn second_trigger_while_busy_is_ignored() {
        let mock = MockService::new((200, json!({})), (200, json!({})));
        let mut app = app_with(mock.clone(), 10).await;

        app.step(AppMessage::Line("verify".into())).unwrap();
        app.step(AppMessage::Line("verify".into())).unwrap();
        assert!(app.output().contains("Controls are disabled, please wait."));
        run_until_ready(&mut app).await;
        assert_eq!(mock.received().len(), 1);
    }

    #[tokio::test]
    async fn closed_input_exits_once_idle() {
        let mock = MockService::new((200, json!({})), (200, json!({})));
        let mut app = app_with(mock, 10).await;

        app.step(AppMessage::Line("verify".into())).unwrap();
        // Still busy: keep running until the result has been shown and reset
        assert!(app.step(AppMessage::InputClosed).unwrap());
        loop {
            let message = app.next_message().await.unwrap();
            if !app.step(message).unwrap() {
                break;
            }
        }
        assert_eq!(app.session().state(), &SessionState::Ready);
    }

    #[tokio::test]
    async fn missing_camera_fails_without_request() {
        let mock = MockService::new((200, json!({})), (200, json!({})));
        let base = spawn_service(mock.clone()).await;
        let dispatcher = Arc::new(Dispatcher::new(&service_config(&base)).unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        let settings = CaptureSettings::from(&session_config(10));

        let outcome = perform(Action::Verify, None, dispatcher, settings, tx).await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert!(mock.received().is_empty());
    }

    #[tokio::test]
    async fn camera_failure_disables_the_session() {
        let mock = MockService::new((200, json!({})), (200, json!({})));
        let base = spawn_service(mock).await;
        let dispatcher = Dispatcher::new(&service_config(&base)).unwrap();
        let mut app = App::new(&session_config(10), dispatcher, Presenter::new(Vec::new(), false));

        app.attach_camera(Err(CameraError::PermissionDenied(403))).unwrap();
        assert_eq!(app.session().state(), &SessionState::CameraUnavailable);
        assert!(app.output().contains("Status: Error: camera denied access (HTTP 403)"));
    }
}
