pub mod backup;
pub mod inspect;
pub mod lifecycle;

use anyhow::Result;
use serde::Serialize;

/// How command results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Prints `value` as JSON, or `text` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, text: &str) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text);
        }
        Ok(())
    }
}
