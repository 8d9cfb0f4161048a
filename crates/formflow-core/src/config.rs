//! Engine configuration

use serde::{Deserialize, Serialize};

/// Minimum password length when a password field sets no `minLength`
pub const DEFAULT_PASSWORD_MIN_LENGTH: u32 = 8;

/// Text stored in a derived field whose formula cannot be evaluated
pub const DEFAULT_FORMULA_ERROR_TEXT: &str = "Formula error";

/// Validation and recomputation settings
///
/// Every key is optional in serialized form; missing keys take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Password policy floor; also the effective minimum when `minLength` is unset
    pub password_min_length: u32,
    /// Displayed value of a derived field in error
    pub formula_error_text: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            formula_error_text: DEFAULT_FORMULA_ERROR_TEXT.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"password_min_length": 12}"#).unwrap();
        assert_eq!(config.password_min_length, 12);
        assert_eq!(config.formula_error_text, DEFAULT_FORMULA_ERROR_TEXT);
    }
}
