//! Identifier newtypes shared by the negotiator and the SFU session

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Participant identifier on either end of a peer link
    PeerId
);
string_id!(
    /// Stage being routed
    StageId
);
string_id!(
    /// Local or remote media track identifier
    TrackId
);
string_id!(
    /// Router-side producer identifier
    ProducerId
);
string_id!(
    /// Router-side consumer identifier
    ConsumerId
);
string_id!(
    /// Router-side transport identifier
    TransportId
);
string_id!(
    /// Stage-level identifier of a published track, as listed in the
    /// server-pushed public track list
    PublicTrackId
);
