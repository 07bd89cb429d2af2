use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, TypesError};

/// Navigation origin of a visit, without qualifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CoreTransition {
    Link = 0,
    Typed = 1,
    AutoBookmark = 2,
    AutoSubframe = 3,
    ManualSubframe = 4,
    Generated = 5,
    AutoToplevel = 6,
    FormSubmit = 7,
    Reload = 8,
    Keyword = 9,
    KeywordGenerated = 10,
}

impl CoreTransition {
    pub const ALL: [CoreTransition; 11] = [
        CoreTransition::Link,
        CoreTransition::Typed,
        CoreTransition::AutoBookmark,
        CoreTransition::AutoSubframe,
        CoreTransition::ManualSubframe,
        CoreTransition::Generated,
        CoreTransition::AutoToplevel,
        CoreTransition::FormSubmit,
        CoreTransition::Reload,
        CoreTransition::Keyword,
        CoreTransition::KeywordGenerated,
    ];

    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as u32 == code)
            .ok_or(TypesError::InvalidTransition(code))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoreTransition::Link => "link",
            CoreTransition::Typed => "typed",
            CoreTransition::AutoBookmark => "auto_bookmark",
            CoreTransition::AutoSubframe => "auto_subframe",
            CoreTransition::ManualSubframe => "manual_subframe",
            CoreTransition::Generated => "generated",
            CoreTransition::AutoToplevel => "auto_toplevel",
            CoreTransition::FormSubmit => "form_submit",
            CoreTransition::Reload => "reload",
            CoreTransition::Keyword => "keyword",
            CoreTransition::KeywordGenerated => "keyword_generated",
        }
    }
}

/// Core transition in the low byte plus qualifier bits in the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageTransition(u32);

impl PageTransition {
    pub const CORE_MASK: u32 = 0xFF;
    pub const QUALIFIER_MASK: u32 = 0xFFFF_FF00;

    pub const FORWARD_BACK: u32 = 0x0100_0000;
    pub const FROM_ADDRESS_BAR: u32 = 0x0200_0000;
    pub const HOME_PAGE: u32 = 0x0400_0000;
    pub const CHAIN_START: u32 = 0x1000_0000;
    pub const CHAIN_END: u32 = 0x2000_0000;
    pub const CLIENT_REDIRECT: u32 = 0x4000_0000;
    pub const SERVER_REDIRECT: u32 = 0x8000_0000;
    pub const IS_REDIRECT_MASK: u32 = Self::CLIENT_REDIRECT | Self::SERVER_REDIRECT;

    pub const fn new(core: CoreTransition) -> Self {
        Self(core as u32)
    }

    /// Wraps raw bits, rejecting unknown core kinds.
    pub fn from_bits(bits: u32) -> Result<Self> {
        CoreTransition::from_code(bits & Self::CORE_MASK)?;
        Ok(Self(bits))
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn with_qualifier(self, qualifier: u32) -> Self {
        Self(self.0 | (qualifier & Self::QUALIFIER_MASK))
    }

    pub fn core(&self) -> CoreTransition {
        // Constructors never admit an unknown core kind.
        CoreTransition::from_code(self.0 & Self::CORE_MASK).unwrap_or(CoreTransition::Link)
    }

    pub const fn strip_qualifier(&self) -> Self {
        Self(self.0 & Self::CORE_MASK)
    }

    pub const fn qualifiers(&self) -> u32 {
        self.0 & Self::QUALIFIER_MASK
    }

    pub const fn has_qualifier(&self, qualifier: u32) -> bool {
        self.0 & qualifier != 0
    }

    pub const fn is_redirect(&self) -> bool {
        self.0 & Self::IS_REDIRECT_MASK != 0
    }

    pub const fn is_chain_end(&self) -> bool {
        self.0 & Self::CHAIN_END != 0
    }
}

impl TryFrom<u32> for PageTransition {
    type Error = TypesError;

    fn try_from(bits: u32) -> Result<Self> {
        Self::from_bits(bits)
    }
}

impl From<PageTransition> for u32 {
    fn from(transition: PageTransition) -> u32 {
        transition.0
    }
}

impl From<CoreTransition> for PageTransition {
    fn from(core: CoreTransition) -> Self {
        Self::new(core)
    }
}

impl fmt::Display for PageTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.core().as_str())?;
        if self.qualifiers() != 0 {
            write!(f, "|{:#010x}", self.qualifiers())?;
        }
        Ok(())
    }
}
