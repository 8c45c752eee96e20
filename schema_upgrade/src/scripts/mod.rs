//! Script repository
//!
//! This module discovers upgrade scripts and puts them in the order they are
//! applied. Providers only read scripts, they never parse or run them.

pub mod embedded;
pub mod filesystem;

use std::collections::HashSet;

use crate::error::Result;

pub use embedded::EmbeddedScriptProvider;
pub use filesystem::FileSystemScriptProvider;

/// One named block of SQL, applied at most once per database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUnit {
    pub name: String,
    pub contents: String,
}

impl ScriptUnit {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Hex MD5 of the script contents, stored alongside the ledger record
    pub fn checksum(&self) -> String {
        format!("{:x}", md5::compute(self.contents.as_bytes()))
    }
}

/// Anything that can produce named script units
pub trait ScriptProvider: Send + Sync {
    /// Human readable location, used in log entries
    fn location(&self) -> String;

    /// Read every script the source holds, in no particular order
    fn get_scripts(&self) -> Result<Vec<ScriptUnit>>;
}

/// Read a provider's scripts in application order.
///
/// Names are compared ordinally so that the order never depends on the
/// locale. When two scripts share a name the first one read wins.
pub fn list_scripts(provider: &dyn ScriptProvider) -> Result<Vec<ScriptUnit>> {
    let scripts = provider.get_scripts()?;
    Ok(order_scripts(scripts))
}

fn order_scripts(scripts: Vec<ScriptUnit>) -> Vec<ScriptUnit> {
    let mut seen = HashSet::new();
    let mut unique: Vec<ScriptUnit> = Vec::with_capacity(scripts.len());

    for script in scripts {
        if seen.insert(script.name.clone()) {
            unique.push(script);
        } else {
            tracing::warn!(script = %script.name, "Duplicate script name ignored");
        }
    }

    unique.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    unique
}
