//! Canonical 128-bit identifiers.
//!
//! Both the user id (`uid`, assigned on key upload) and the job id (assigned
//! on task submission) share the same representation: a v4 UUID formatted as
//! a canonical hyphenated hex string. Keeping them as distinct newtypes stops
//! the two id spaces from being swapped at call sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// First segment of the hyphenated form, safe to put in logs.
            pub fn log_prefix(&self) -> String {
                self.0
                    .to_string()
                    .split('-')
                    .next()
                    .unwrap_or_default()
                    .to_owned()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = BrokerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| BrokerError::InvalidId(s.to_owned()))
            }
        }
    };
}

uuid_id!(Uid);
uuid_id!(JobId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let uid = Uid::new();
        let parsed: Uid = uid.to_string().parse().unwrap();
        assert_eq!(uid, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!("../etc/passwd".parse::<Uid>().is_err());
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(Uid::new(), Uid::new());
    }
}
