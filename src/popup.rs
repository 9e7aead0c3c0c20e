// ============================================
// Talon - popup.rs
// ============================================
// The "show the user a message" seam.
//
// Two kinds of message:
//   - allow_continue = false: something fatal. The only button is OK,
//     and the caller exits afterwards.
//   - allow_continue = true: a warning. The user picks Continue or Exit.
//
// DialogPresenter shows a native message box (Windows).
// ConsolePresenter prints to the terminal for --headless runs.
// ============================================

use std::io::{BufRead, Write};

use tracing::info;

/// What the user picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Continue,
    Exit,
}

pub trait Presenter {
    /// Blocks until the user answers.
    /// With `allow_continue == false` this always returns `Choice::Exit`.
    fn show(&self, message: &str, allow_continue: bool) -> Choice;
}

// ============================================
// NATIVE DIALOG
// ============================================

/// Native message box via rfd
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct DialogPresenter;

#[cfg(windows)]
impl Presenter for DialogPresenter {
    fn show(&self, message: &str, allow_continue: bool) -> Choice {
        use rfd::{MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};

        if !allow_continue {
            MessageDialog::new()
                .set_level(MessageLevel::Error)
                .set_title("Talon")
                .set_description(message)
                .set_buttons(MessageButtons::Ok)
                .show();
            return Choice::Exit;
        }

        let text = format!("{}\n\nPress OK to continue anyway, or Cancel to exit.", message);
        let result = MessageDialog::new()
            .set_level(MessageLevel::Warning)
            .set_title("Talon")
            .set_description(text)
            .set_buttons(MessageButtons::OkCancel)
            .show();

        match result {
            MessageDialogResult::Ok | MessageDialogResult::Yes => Choice::Continue,
            _ => Choice::Exit,
        }
    }
}

// ============================================
// CONSOLE
// ============================================

/// Terminal prompts, used in headless mode.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    /// Answer "continue" to every warning without asking
    pub assume_yes: bool,
}

impl ConsolePresenter {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    /// The prompt logic, over any input/output pair
    fn ask(&self, message: &str, allow_continue: bool, input: &mut dyn BufRead, out: &mut dyn Write) -> Choice {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", message);

        if !allow_continue {
            return Choice::Exit;
        }
        if self.assume_yes {
            let _ = writeln!(out, "Continuing (--yes).");
            return Choice::Continue;
        }

        let _ = write!(out, "Continue anyway? [y/N] ");
        let _ = out.flush();

        let mut answer = String::new();
        if input.read_line(&mut answer).is_err() {
            return Choice::Exit;
        }
        parse_answer(&answer)
    }
}

impl Presenter for ConsolePresenter {
    fn show(&self, message: &str, allow_continue: bool) -> Choice {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut out = std::io::stderr();
        let choice = self.ask(message, allow_continue, &mut input, &mut out);
        info!("User answered {:?}", choice);
        choice
    }
}

/// Anything but an explicit yes means exit
fn parse_answer(answer: &str) -> Choice {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "c" | "continue" => Choice::Continue,
        _ => Choice::Exit,
    }
}

/// Pick the presenter for this run
pub fn default_presenter(headless: bool, assume_yes: bool) -> Box<dyn Presenter> {
    #[cfg(windows)]
    {
        if !headless {
            return Box::new(DialogPresenter);
        }
    }
    #[cfg(not(windows))]
    let _ = headless;

    Box::new(ConsolePresenter::new(assume_yes))
}

// ============================================
// TEST HELPER
// ============================================

/// Remembers every popup and answers from a script.
#[cfg(test)]
pub struct RecordingPresenter {
    pub shown: std::cell::RefCell<Vec<(String, bool)>>,
    pub answer: Choice,
}

#[cfg(test)]
impl RecordingPresenter {
    pub fn answering(answer: Choice) -> Self {
        Self {
            shown: std::cell::RefCell::new(Vec::new()),
            answer,
        }
    }

    pub fn count(&self) -> usize {
        self.shown.borrow().len()
    }
}

#[cfg(test)]
impl Presenter for RecordingPresenter {
    fn show(&self, message: &str, allow_continue: bool) -> Choice {
        self.shown.borrow_mut().push((message.to_string(), allow_continue));
        if allow_continue {
            self.answer
        } else {
            Choice::Exit
        }
    }
}
