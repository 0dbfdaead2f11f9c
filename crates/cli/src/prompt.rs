//! Interactive prompts.

use std::io;
use std::sync::Arc;

use wfctl_registry::Confirm;

/// Questions the commands may put to the user.
pub trait Prompter: Send + Sync {
    fn confirm(&self, prompt: &str) -> io::Result<bool>;

    fn input(&self, prompt: &str) -> io::Result<String>;

    /// Returns the index of the chosen item.
    fn select(&self, prompt: &str, items: &[&str]) -> io::Result<usize>;
}

/// Terminal prompts via `dialoguer`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

fn io_err(e: dialoguer::Error) -> io::Error {
    io::Error::other(e.to_string())
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(io_err)
    }

    fn input(&self, prompt: &str) -> io::Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .interact_text()
            .map_err(io_err)
    }

    fn select(&self, prompt: &str, items: &[&str]) -> io::Result<usize> {
        dialoguer::Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .map_err(io_err)
    }
}

/// Lets the registry client ask through a [`Prompter`].
pub struct PrompterConfirm(pub Arc<dyn Prompter>);

impl Confirm for PrompterConfirm {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        self.0.confirm(prompt)
    }
}
