//! Terminal implementation of [`Prompt`].

use std::io::{BufRead, Write};

use crate::ui::{is_affirmative, DisplayError, Prompt};

/// Line-oriented prompt over any reader/writer pair; stdin/stdout in the app.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_answer(&mut self, question: &str) -> Result<Option<String>, DisplayError> {
        write!(self.output, "{question} ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Prompt for TerminalPrompt<R, W> {
    fn ask_label(&mut self, question: &str) -> Result<Option<String>, DisplayError> {
        self.read_answer(question)
    }

    fn confirm(&mut self, question: &str) -> Result<bool, DisplayError> {
        let answer = self.read_answer(&format!("{question} [s/N]"))?;
        Ok(answer.is_some_and(|a| is_affirmative(&a)))
    }

    fn notify(&mut self, message: &str) {
        if let Err(e) = writeln!(self.output, "{message}") {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }
}
