//! In-memory script source

use crate::error::Result;
use crate::scripts::{ScriptProvider, ScriptUnit};

/// Scripts compiled into the binary or built by the caller
#[derive(Debug, Clone, Default)]
pub struct EmbeddedScriptProvider {
    scripts: Vec<ScriptUnit>,
}

impl EmbeddedScriptProvider {
    pub fn new(scripts: Vec<ScriptUnit>) -> Self {
        Self { scripts }
    }

    /// Build from `(name, contents)` pairs, e.g. a list of `include_str!`s
    pub fn from_pairs<I, N, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, contents)| ScriptUnit::new(name, contents))
                .collect(),
        )
    }
}

impl ScriptProvider for EmbeddedScriptProvider {
    fn location(&self) -> String {
        "<embedded>".to_string()
    }

    fn get_scripts(&self) -> Result<Vec<ScriptUnit>> {
        Ok(self.scripts.clone())
    }
}
