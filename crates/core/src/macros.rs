// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Declarative macros for reducing boilerplate.
//!
//! - [`string_enum!`] — paired `Display`/`FromStr` impls mapping unit
//!   variants to their wire strings
//! - [`seq_id!`] — `u32` newtype ids handed out by registry counters

/// Generate `Display` and `FromStr` impls that map unit variants to
/// string literals. Parsing is the exact inverse of display; anything
/// else yields the given error constructor applied to the input.
///
/// ```ignore
/// crate::string_enum! {
///     MyEnum, MyParseError {
///         Foo => "foo",
///         Bar => "bar",
///     }
/// }
/// ```
#[macro_export]
macro_rules! string_enum {
    ($enum:ty, $err:ident { $( $variant:ident => $str:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $enum {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $( Self::$variant => $str, )+
                })
            }
        }

        impl std::str::FromStr for $enum {
            type Err = $err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $str => Ok(Self::$variant), )+
                    _ => Err($err(s.to_string())),
                }
            }
        }
    };
}

/// Define a newtype id over `u32`.
///
/// Registry counters allocate these monotonically; the raw value is
/// stable on the wire and in exported object paths.
///
/// ```ignore
/// crate::seq_id! {
///     /// Doc comment for the id type.
///     pub struct JobId;
/// }
/// ```
#[macro_export]
macro_rules! seq_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}
