//! Console prompts behind an injectable input source.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

pub trait InputSource: Send {
    /// Shows `prompt` and reads one line. `None` means no answer can be
    /// obtained (end of input or a non-interactive run).
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    /// Shows an informational line to the operator.
    fn message(&mut self, text: &str);

    fn is_interactive(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct StdinInput;

impl InputSource for StdinInput {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn message(&mut self, text: &str) {
        println!("{}", text);
    }
}

/// Forced mode: every prompt takes its default.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl InputSource for NonInteractive {
    fn read_line(&mut self, _prompt: &str) -> Option<String> {
        None
    }

    fn message(&mut self, text: &str) {
        log::info!("{}", text);
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// Canned answers, for tests and scripted runs.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
    pub messages: Vec<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front()
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

/// Parses a 1-based menu choice into a 0-based index.
pub fn parse_selection(raw: &str, count: usize) -> Result<usize> {
    let raw = raw.trim();
    let choice: usize = raw
        .parse()
        .map_err(|_| Error::InvalidSelection(format!("'{}' is not a number", raw)))?;
    if choice == 0 || choice > count {
        return Err(Error::InvalidSelection(format!(
            "choose a number between 1 and {}",
            count
        )));
    }
    Ok(choice - 1)
}

/// Shows a numbered list and asks until a valid entry is chosen.
///
/// Empty input picks `default` (0-based). So does running out of input,
/// exhausting `max_attempts` or a non-interactive source. A single entry is
/// listed and taken without asking.
pub fn select_index(
    input: &mut dyn InputSource,
    title: &str,
    options: &[String],
    default: usize,
    max_attempts: Option<usize>,
) -> usize {
    let default = default.min(options.len().saturating_sub(1));
    if options.is_empty() {
        return default;
    }

    input.message(title);
    for (i, option) in options.iter().enumerate() {
        input.message(&format!("  [{}] {}", i + 1, option));
    }
    if options.len() == 1 {
        input.message(&format!("Using {}, the only entry", options[0]));
        return 0;
    }
    if !input.is_interactive() {
        return default;
    }

    let prompt = format!("Select 1-{} [default {}]: ", options.len(), default + 1);
    let mut attempts = 0;
    loop {
        if max_attempts.is_some_and(|max| attempts >= max) {
            input.message(&format!("No valid selection; using {}", default + 1));
            return default;
        }
        attempts += 1;

        let Some(answer) = input.read_line(&prompt) else {
            return default;
        };
        if answer.trim().is_empty() {
            return default;
        }
        match parse_selection(&answer, options.len()) {
            Ok(index) => return index,
            Err(e) => input.message(&format!("Invalid selection: {}", e)),
        }
    }
}
