use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde goes through the same string table so wire values match `as_str`.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

str_enum!(
    /// Finding severity. Every finding leaving the rule engine carries one of these.
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

impl Severity {
    /// Coerce a free-form severity label into the enumerated set.
    /// Anything unrecognised clamps to `Medium`.
    pub fn coerce(raw: &str) -> Self {
        raw.trim()
            .to_lowercase()
            .parse()
            .unwrap_or(Severity::Medium)
    }
}

str_enum!(
    /// Narrative strategy for a run.
    AnalysisMode {
        Mock => "mock",
        Llm => "llm",
    }
);

impl Default for AnalysisMode {
    fn default() -> Self {
        Self::Mock
    }
}

str_enum!(
    /// Outcome of the model-backed path for one evaluated patient.
    LlmStatus {
        Ok => "ok",
        Skipped => "skipped",
        Failed => "failed",
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn severity_round_trip() {
        for (variant, s) in [
            (Severity::Low, "low"),
            (Severity::Medium, "medium"),
            (Severity::High, "high"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(Severity::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn severity_coerce_clamps_unknown_to_medium() {
        assert_eq!(Severity::coerce("HIGH"), Severity::High);
        assert_eq!(Severity::coerce(" low "), Severity::Low);
        assert_eq!(Severity::coerce("critical"), Severity::Medium);
        assert_eq!(Severity::coerce(""), Severity::Medium);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Severity = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Severity::Low);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let err = AnalysisMode::from_str("remote").unwrap_err();
        assert!(err.to_string().contains("AnalysisMode"));
        assert!(serde_json::from_str::<AnalysisMode>("\"remote\"").is_err());
    }

    #[test]
    fn llm_status_display() {
        assert_eq!(LlmStatus::Skipped.to_string(), "skipped");
    }
}
