//! Human-readable stage output
//!
//! Every stage announces what it is about to do and reports the outcome.
//! Warnings are also kept so the final summary can repeat them.

use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
pub struct Progress {
    prefix: Option<String>,
    warnings: Mutex<Vec<String>>,
}

impl Progress {
    /// Output without a prefix, for sequential runs
    pub fn plain() -> Self {
        Self::default()
    }

    /// Output prefixed with `[label]`, for banks running side by side
    pub fn labelled(label: &str) -> Self {
        Self {
            prefix: Some(format!("[{label}] ")),
            warnings: Mutex::new(Vec::new()),
        }
    }

    fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn banner(&self, message: impl AsRef<str>) {
        println!();
        println!("{}🚀 {}", self.prefix(), message.as_ref());
    }

    pub fn step(&self, message: impl AsRef<str>) {
        println!("{}🔧 {}", self.prefix(), message.as_ref());
    }

    pub fn done(&self, message: impl AsRef<str>) {
        println!("{}  ✅ {}", self.prefix(), message.as_ref());
    }

    pub fn note(&self, message: impl AsRef<str>) {
        println!("{}  ℹ️  {}", self.prefix(), message.as_ref());
    }

    /// Soft failure: printed, logged and remembered for the summary
    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        eprintln!("{}  ⚠️  WARNING: {}", self.prefix(), message);
        warn!("{message}");
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }

    /// Command the operator can run to check on a soft failure later
    pub fn hint(&self, command: impl AsRef<str>) {
        eprintln!("{}     re-check with: {}", self.prefix(), command.as_ref());
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}
