use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// The strategy that produced a categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationMethod {
    /// A user or system defined categorization rule matched.
    Rule,
    /// The category supplied by the bank was mapped to a local category.
    BankCategory,
    /// The statistical model predicted the category.
    Statistical,
    /// The language model suggested the category.
    LanguageModel,
    /// The user set the category by hand.
    Manual,
}

impl CategorizationMethod {
    /// The label stored in the database and shown in the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorizationMethod::Rule => "rule",
            CategorizationMethod::BankCategory => "bank_category",
            CategorizationMethod::Statistical => "statistical",
            CategorizationMethod::LanguageModel => "language_model",
            CategorizationMethod::Manual => "manual",
        }
    }
}

impl Display for CategorizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CategorizationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule" => Ok(CategorizationMethod::Rule),
            "bank_category" => Ok(CategorizationMethod::BankCategory),
            "statistical" => Ok(CategorizationMethod::Statistical),
            "language_model" => Ok(CategorizationMethod::LanguageModel),
            "manual" => Ok(CategorizationMethod::Manual),
            other => Err(Error::UnknownCategorizationMethod(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::CategorizationMethod;

    #[test]
    fn labels_parse_back() {
        for method in [
            CategorizationMethod::Rule,
            CategorizationMethod::BankCategory,
            CategorizationMethod::Statistical,
            CategorizationMethod::LanguageModel,
            CategorizationMethod::Manual,
        ] {
            assert_eq!(method.as_str().parse(), Ok(method));
        }
    }

    #[test]
    fn unknown_label_is_an_error() {
        assert_eq!(
            "magic".parse::<CategorizationMethod>(),
            Err(Error::UnknownCategorizationMethod("magic".to_owned()))
        );
    }
}
