use face_gate_common::protocol::VerifyResult;
use std::fmt;
use std::io::{self, Write};

use crate::session::Session;

/// Semantic category of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Ready,
    Verifying,
    Success,
    Failed,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Ready => "ready",
            Category::Verifying => "verifying",
            Category::Success => "success",
            Category::Failed => "failed",
        }
    }

    fn ansi(self) -> &'static str {
        match self {
            Category::Ready => "\x1b[36m",
            Category::Verifying => "\x1b[33m",
            Category::Success => "\x1b[32m",
            Category::Failed => "\x1b[31m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub category: Category,
}

impl Status {
    pub fn new(message: impl Into<String>, category: Category) -> Self {
        Self {
            message: message.into(),
            category,
        }
    }

    pub fn starting() -> Self {
        Self::new("Starting camera...", Category::Verifying)
    }

    pub fn ready() -> Self {
        Self::new("Ready", Category::Ready)
    }

    pub fn verifying() -> Self {
        Self::new("Verifying...", Category::Verifying)
    }

    pub fn registering(name: &str) -> Self {
        Self::new(format!("Registering {name}..."), Category::Verifying)
    }

    pub fn verified(result: &VerifyResult) -> Self {
        match result {
            VerifyResult::Match {
                name,
                match_percentage,
            } => {
                // Halves round up, not to even.
                let pct = (match_percentage * 10.0).round() / 10.0;
                Self::new(
                    format!("Success! Welcome, {name} ({pct:.1}% Match)"),
                    Category::Success,
                )
            }
            VerifyResult::NoMatch => Self::new("Verification FAILED.", Category::Failed),
        }
    }

    pub fn registered(message: &str) -> Self {
        Self::new(message, Category::Success)
    }

    pub fn error(reason: &str) -> Self {
        Self::new(format!("Error: {reason}"), Category::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status: {}", self.message)
    }
}

/// What the viewer area shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Live,
    /// The frame that was submitted, held while its result is shown.
    Frozen { label: String },
}

/// Renders the session to a terminal-like writer.
pub struct Presenter<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> Presenter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn status_line(&self, status: &Status) -> String {
        if self.color {
            format!(
                "{}[status-{}] {status}\x1b[0m",
                status.category.ansi(),
                status.category.as_str()
            )
        } else {
            format!("[status-{}] {status}", status.category.as_str())
        }
    }

    pub fn render(&mut self, session: &Session) -> io::Result<()> {
        let view = match session.view() {
            View::Live => "live".to_string(),
            View::Frozen { label } => format!("frozen {label}"),
        };
        let controls = if session.controls_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        let line = self.status_line(session.status());
        writeln!(self.out, "{line}")?;
        writeln!(
            self.out,
            "  view: {view} | controls: {controls} | name: {:?}",
            session.name_input()
        )?;
        self.out.flush()
    }

    /// The terminal stand-in for a modal alert.
    pub fn alert(&mut self, message: &str) -> io::Result<()> {
        let bar = "!".repeat(message.chars().count().clamp(8, 72) + 4);
        writeln!(self.out, "{bar}")?;
        writeln!(self.out, "! {message} !")?;
        writeln!(self.out, "{bar}")?;
        self.out.flush()
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_percentage_rounds_to_one_decimal() {
        let status = Status::verified(&VerifyResult::Match {
            name: "Ada".into(),
            match_percentage: 87.34,
        });
        assert_eq!(status.message, "Success! Welcome, Ada (87.3% Match)");
        assert_eq!(status.category, Category::Success);

        let status = Status::verified(&VerifyResult::Match {
            name: "Ada".into(),
            match_percentage: 100.0,
        });
        assert_eq!(status.message, "Success! Welcome, Ada (100.0% Match)");
    }

    #[test]
    fn match_percentage_halves_round_up() {
        for (pct, shown) in [(87.25, "87.3"), (0.25, "0.3")] {
            let status = Status::verified(&VerifyResult::Match {
                name: "Ada".into(),
                match_percentage: pct,
            });
            assert_eq!(status.message, format!("Success! Welcome, Ada ({shown}% Match)"));
        }
    }

    #[test]
    fn no_match_is_failure() {
        let status = Status::verified(&VerifyResult::NoMatch);
        assert_eq!(status.message, "Verification FAILED.");
        assert_eq!(status.category, Category::Failed);
    }

    #[test]
    fn error_status_prefix() {
        let status = Status::error("bad frame");
        assert_eq!(status.to_string(), "Status: Error: bad frame");
        assert_eq!(status.category, Category::Failed);
    }

    #[test]
    fn plain_status_line_has_category_class() {
        let presenter = Presenter::new(Vec::new(), false);
        assert_eq!(presenter.status_line(&Status::ready()), "[status-ready] Status: Ready");
    }

    #[test]
    fn colored_status_line_resets_attributes() {
        let presenter = Presenter::new(Vec::new(), true);
        let line = presenter.status_line(&Status::verifying());
        assert!(line.starts_with("\x1b[33m[status-verifying]"));
        assert!(line.ends_with("\x1b[0m"));
    }

    #[test]
    fn alert_is_framed() {
        let mut presenter = Presenter::new(Vec::new(), false);
        presenter.alert("Registration failed: bad frame").unwrap();
        let out = String::from_utf8(presenter.get_ref().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "! Registration failed: bad frame !");
    }
}
