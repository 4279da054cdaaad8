//! Interactive fallback for user and database

use dialoguer::Input;
use dialoguer::theme::ColorfulTheme;
use snafu::ResultExt;
use std::io::IsTerminal;

use super::{BenchError, PromptSnafu};

/// Asks for a missing connection field
pub trait Prompter {
    /// `default` is the scraped value, if any. `None` means no answer.
    fn ask(&self, label: &str, default: Option<&str>) -> Result<Option<String>, BenchError>;
}

/// Prompts on the terminal
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&self, label: &str, default: Option<&str>) -> Result<Option<String>, BenchError> {
        let mut input = Input::<String>::with_theme(&self.theme)
            .with_prompt(label)
            .allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        let answer = input.interact_text().context(PromptSnafu)?;
        let answer = answer.trim();
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }
}

/// Takes the default without asking (`--yes`, or no terminal attached)
pub struct AcceptDefaults;

impl Prompter for AcceptDefaults {
    fn ask(&self, label: &str, default: Option<&str>) -> Result<Option<String>, BenchError> {
        tracing::debug!(label, has_default = default.is_some(), "not prompting");
        Ok(default.map(str::to_string))
    }
}

/// Terminal prompts only when someone can answer them
pub fn for_session(assume_yes: bool) -> Box<dyn Prompter> {
    if assume_yes || !std::io::stdin().is_terminal() {
        Box::new(AcceptDefaults)
    } else {
        Box::new(TerminalPrompter::new())
    }
}
