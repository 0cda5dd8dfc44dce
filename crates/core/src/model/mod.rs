//! Persisted entities of the scheduled execution core.
//!
//! Enum columns are stored as text and converted with `TryFrom<String>` so
//! rows can be decoded with `#[sqlx(try_from = "String")]`.

/// Implements `as_str`, `Display`, `FromStr` (case-insensitive) and
/// `TryFrom<String>` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, $crate::error::CoreError> {
                $(
                    if s.trim().eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::error::CoreError::unknown($label, s))
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::error::CoreError;

            fn try_from(value: String) -> Result<Self, $crate::error::CoreError> {
                value.parse()
            }
        }
    };
}

pub mod alert;
pub mod connection;
pub mod pipeline;
pub mod report;

pub use alert::*;
pub use connection::*;
pub use pipeline::*;
pub use report::*;
