//! Engine configuration, read from TOML by the front ends.
//!
//! ```toml
//! [inference]
//! max_depth = 64
//! timeout_ms = 2000
//!
//! [lexicon]
//! files = ["extra-words.toml"]
//! ```
//!
//! Every field is optional. Reading files is left to the caller; this
//! module only parses.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::InferenceBudget;
use crate::error::ConfigError;
use crate::lexicon::Lexicon;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub inference: InferenceConfig,
    pub lexicon: LexiconConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub max_depth: usize,
    pub max_steps: u64,
    pub timeout_ms: u64,
    pub max_term_depth: usize,
    pub max_rounds: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let budget = InferenceBudget::default();
        Self {
            max_depth: budget.max_depth,
            max_steps: budget.max_steps,
            timeout_ms: budget.timeout.as_millis() as u64,
            max_term_depth: budget.max_term_depth,
            max_rounds: budget.max_rounds,
        }
    }
}

/// Extra vocabulary files, relative to the config file's directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LexiconConfig {
    pub files: Vec<PathBuf>,
}

impl EngineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    pub fn budget(&self) -> InferenceBudget {
        let i = &self.inference;
        InferenceBudget {
            max_depth: i.max_depth,
            max_steps: i.max_steps,
            timeout: Duration::from_millis(i.timeout_ms),
            max_term_depth: i.max_term_depth,
            max_rounds: i.max_rounds,
        }
    }
}

/// The builtin lexicon extended with each vocabulary source in order.
pub fn build_lexicon<S: AsRef<str>>(sources: &[S]) -> Result<Lexicon, ConfigError> {
    let mut lexicon = Lexicon::builtin()?;
    for src in sources {
        lexicon.extend_from_toml(src.as_ref())?;
    }
    Ok(lexicon)
}
