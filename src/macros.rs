//! Helper macros shared by the domain modules.

/// Implements `as_str`, `ALL`, `Display` and `FromStr` for a fieldless enum
/// whose variants map one-to-one onto lowercase database strings.
macro_rules! text_enum {
    ($ty:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Database/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(format!(concat!("Unknown ", $label, ": {}"), s)),
                }
            }
        }
    };
}

pub(crate) use text_enum;
