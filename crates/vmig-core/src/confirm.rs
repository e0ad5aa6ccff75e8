//! Confirmation providers for stage gates.
//!
//! Stages never read the terminal directly; they ask a [`Confirmer`]. The
//! CLI injects [`ConsoleConfirmer`] (or [`AutoConfirmer`] for `--yes`),
//! tests inject [`ScriptedConfirmer`].

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// Answer to a per-unit prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitDecision {
    Proceed,
    /// Leave this unit alone and move to the next one.
    Skip,
    /// Stop processing the remaining units in this step.
    Abort,
}

/// Capability to gate a step on a user decision.
pub trait Confirmer: Send + Sync {
    /// Yes/no question.
    fn confirm(&self, prompt: &str) -> bool;

    /// Question about a single unit, allowing skip and abort.
    fn confirm_unit(&self, prompt: &str) -> UnitDecision {
        if self.confirm(prompt) {
            UnitDecision::Proceed
        } else {
            UnitDecision::Skip
        }
    }
}

/// Always answers the same way; `--yes` uses `AutoConfirmer::new(true)`.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirmer {
    answer: bool,
}

impl AutoConfirmer {
    pub fn new(answer: bool) -> Self {
        Self { answer }
    }
}

impl Confirmer for AutoConfirmer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.answer
    }

    fn confirm_unit(&self, _prompt: &str) -> UnitDecision {
        if self.answer {
            UnitDecision::Proceed
        } else {
            UnitDecision::Skip
        }
    }
}

/// Interactive prompts on stderr, answers read from stdin.
#[derive(Debug, Default)]
pub struct ConsoleConfirmer;

impl ConsoleConfirmer {
    fn ask(&self, prompt: &str, choices: &str) -> Option<String> {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{} {} ", prompt, choices);
        let _ = stderr.flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_ascii_lowercase()),
        }
    }
}

impl Confirmer for ConsoleConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        matches!(self.ask(prompt, "(Y/N)").as_deref(), Some("y" | "yes"))
    }

    fn confirm_unit(&self, prompt: &str) -> UnitDecision {
        match self.ask(prompt, "[Y] Yes  [S] Skip  [A] Abort").as_deref() {
            Some("y" | "yes") => UnitDecision::Proceed,
            Some("a" | "abort") | None => UnitDecision::Abort,
            _ => UnitDecision::Skip,
        }
    }
}

/// Replays a fixed sequence of answers and records every prompt.
///
/// Once the script runs out every further question is declined.
#[derive(Debug, Default)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<UnitDecision>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: impl IntoIterator<Item = UnitDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Script of yes/no answers.
    pub fn from_bools(answers: impl IntoIterator<Item = bool>) -> Self {
        Self::new(answers.into_iter().map(|yes| {
            if yes {
                UnitDecision::Proceed
            } else {
                UnitDecision::Skip
            }
        }))
    }

    /// Every prompt asked so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn next(&self, prompt: &str) -> UnitDecision {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prompt.to_string());
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(UnitDecision::Skip)
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        self.next(prompt) == UnitDecision::Proceed
    }

    fn confirm_unit(&self, prompt: &str) -> UnitDecision {
        self.next(prompt)
    }
}
