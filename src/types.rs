use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;

macro_rules! impl_primitive_num {
    (pub struct $outer:ident($tname:ty)) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            Serialize,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Deserialize,
            Shrinkwrap,
        )]
        pub struct $outer(pub $tname);

        impl std::fmt::Display for $outer {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $outer {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

impl_primitive_num!(pub struct GasPerPubdata(u64));
impl_primitive_num!(pub struct ChainId(u64));

impl GasPerPubdata {
    /// Per-pubdata gas limit zkSync wallets attach when nothing else is
    /// configured.
    pub const DEFAULT: Self = Self(50_000);
}

impl Default for GasPerPubdata {
    fn default() -> Self {
        Self::DEFAULT
    }
}
