//! Serde helpers shared by the configuration types

/// `Duration` stored as whole seconds, e.g. `startup_timeout = 120`
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        startup: Duration,
    }

    #[test]
    fn test_duration_in_toml() {
        let parsed: Timeouts = toml::from_str("startup = 90").unwrap();
        assert_eq!(parsed.startup, Duration::from_secs(90));

        let rendered = toml::to_string(&parsed).unwrap();
        assert_eq!(rendered.trim(), "startup = 90");
    }

    #[test]
    fn test_sub_second_precision_is_dropped() {
        let value = Timeouts {
            startup: Duration::from_millis(2500),
        };
        let rendered = toml::to_string(&value).unwrap();
        assert_eq!(rendered.trim(), "startup = 2");
    }
}
