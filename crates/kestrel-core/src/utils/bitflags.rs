// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro declaring typed sets of bit flags.

/// Declares a `Copy` flag set over an integer, with set operations and a
/// `Debug` output listing the named flags it contains.
///
/// ```
/// kestrel_core::kestrel_bitflags! {
///     /// Access rights.
///     pub struct Access: u8 {
///         /// Readable.
///         const READ = 1 << 0;
///         /// Writable.
///         const WRITE = 1 << 1;
///     }
/// }
///
/// let rw = Access::READ | Access::WRITE;
/// assert!(rw.contains(Access::WRITE));
/// assert_eq!(format!("{rw:?}"), "Access { READ | WRITE }");
/// ```
#[macro_export]
macro_rules! kestrel_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// The empty set.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Creates a set from raw bits. Unknown bits are kept.
            pub const fn from_bits_truncate(bits: $ty) -> Self {
                Self { bits }
            }

            /// The raw bits of the set.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if the set holds no flag.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Returns `true` if every flag of `other` is in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if `self` and `other` share at least one flag.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Returns `self` with the flags of `other` added.
            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns `self` with the flags of `other` removed.
            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }

            /// Adds the flags of `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Removes the flags of `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                self.with(other)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.insert(other);
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::Sub for $name {
            type Output = Self;
            fn sub(self, other: Self) -> Self {
                self.without(other)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut rest = self.bits;
                let mut separator = "";
                write!(f, "{} {{ ", stringify!($name))?;
                $(
                    let flag: $ty = $flag_value;
                    // Composite flags are printed only if none of their bits were named yet.
                    if flag != 0 && (rest & flag) == flag {
                        write!(f, "{separator}{}", stringify!($flag_name))?;
                        rest &= !flag;
                        separator = " | ";
                    }
                )*
                if rest != 0 {
                    write!(f, "{separator}UNKNOWN({rest:#x})")?;
                } else if self.bits == 0 {
                    write!(f, "EMPTY")?;
                }
                write!(f, " }}")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::kestrel_bitflags;

    kestrel_bitflags! {
        /// Flags used by the tests below.
        pub struct Stages: u16 {
            const VERTEX = 1 << 0;
            const FRAGMENT = 1 << 1;
            const COMPUTE = 1 << 2;
            const GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
        }
    }

    #[test]
    fn set_operations() {
        let mut stages = Stages::VERTEX | Stages::COMPUTE;
        assert!(stages.contains(Stages::COMPUTE));
        assert!(!stages.contains(Stages::GRAPHICS));
        assert!(stages.intersects(Stages::GRAPHICS));

        stages |= Stages::FRAGMENT;
        assert!(stages.contains(Stages::GRAPHICS));
        assert_eq!(stages - Stages::GRAPHICS, Stages::COMPUTE);
        assert_eq!((stages & Stages::GRAPHICS).bits(), 0b011);

        stages.remove(Stages::VERTEX | Stages::FRAGMENT | Stages::COMPUTE);
        assert!(stages.is_empty());
        assert_eq!(Stages::default(), Stages::EMPTY);
    }

    #[test]
    fn debug_lists_named_flags_then_unknown_bits() {
        assert_eq!(format!("{:?}", Stages::EMPTY), "Stages { EMPTY }");
        assert_eq!(
            format!("{:?}", Stages::FRAGMENT | Stages::COMPUTE),
            "Stages { FRAGMENT | COMPUTE }"
        );
        assert_eq!(
            format!("{:?}", Stages::VERTEX | Stages::from_bits_truncate(0x100)),
            "Stages { VERTEX | UNKNOWN(0x100) }"
        );
    }
}
