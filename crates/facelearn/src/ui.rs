//! Operator surfaces: the frame display with its keyboard, and the blocking
//! text prompt.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("window error: {0}")]
    Window(String),
    #[error("prompt I/O failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// One key event from the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    Char(char),
    Escape,
    /// The window was closed by the operator.
    Close,
}

/// Shows frames and reports keys pressed since the previous `show`.
pub trait Display {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError>;

    /// Non-blocking; at most one key per call.
    fn poll_key(&mut self) -> Option<KeyPress>;
}

/// Blocking operator dialogue. Every call stalls the frame loop until the
/// operator answers.
pub trait Prompt {
    /// Ask for a name. `None` when the operator gives up (EOF).
    fn ask_label(&mut self, question: &str) -> Result<Option<String>, DisplayError>;

    fn confirm(&mut self, question: &str) -> Result<bool, DisplayError>;

    /// Non-blocking message to the operator.
    fn notify(&mut self, message: &str);
}

/// Answers accepted as "yes" by `confirm`.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "s" | "si" | "sí" | "y" | "yes"
    )
}
