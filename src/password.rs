//! Password encoding policy

use serde::{Deserialize, Serialize};

/// Outcome of checking one password-typed attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordStatus {
    Acceptable,
    PlainText,
    UnsupportedAes,
    UnsupportedHash,
    UnsupportedCustom { algorithm: String },
}

pub trait PasswordPolicy {
    /// Classify `value`; `hash_allowed` is set for attributes typed as a
    /// one-way password hash
    fn check(&self, value: &str, hash_allowed: bool) -> PasswordStatus;
}

/// Encodings the target runtime can decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePasswordPolicy {
    pub supports_aes: bool,
    pub supports_hash: bool,
    /// Custom encryption algorithms installed in the runtime
    pub custom_algorithms: Vec<String>,
}

impl Default for RuntimePasswordPolicy {
    fn default() -> Self {
        Self {
            supports_aes: true,
            supports_hash: true,
            custom_algorithms: Vec::new(),
        }
    }
}

impl PasswordPolicy for RuntimePasswordPolicy {
    fn check(&self, value: &str, hash_allowed: bool) -> PasswordStatus {
        let value = value.trim();
        if value.is_empty() || value.contains("${") {
            return PasswordStatus::Acceptable;
        }
        let Some(algorithm) = value
            .strip_prefix('{')
            .and_then(|rest| rest.split_once('}'))
            .map(|(alg, _)| alg.to_ascii_lowercase())
        else {
            return PasswordStatus::PlainText;
        };

        match algorithm.as_str() {
            "xor" => PasswordStatus::Acceptable,
            "aes" if self.supports_aes => PasswordStatus::Acceptable,
            "aes" => PasswordStatus::UnsupportedAes,
            "hash" if hash_allowed && self.supports_hash => PasswordStatus::Acceptable,
            "hash" => PasswordStatus::UnsupportedHash,
            custom
                if self
                    .custom_algorithms
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(custom)) =>
            {
                PasswordStatus::Acceptable
            }
            _ => PasswordStatus::UnsupportedCustom { algorithm },
        }
    }
}
