//! Domain identifiers recognized by the relay.

use std::fmt;

/// Domain identifier of the destination ledger this relay submits to.
pub const LOCAL_DOMAIN: u32 = 0;

/// Source domains the intake accepts burns from.
///
/// The discriminants are the wire-format domain identifiers used by the
/// attestation service. The destination's own domain is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SourceDomain {
    /// Avalanche C-Chain
    Avalanche = 1,
    /// OP Mainnet
    Optimism = 2,
    /// Arbitrum One
    Arbitrum = 3,
    /// Noble
    Noble = 4,
    /// Solana
    Solana = 5,
    /// Base
    Base = 6,
    /// Polygon PoS
    Polygon = 7,
}

impl SourceDomain {
    /// Human-readable name, used in logs only.
    pub const fn name(&self) -> &'static str {
        match self {
            SourceDomain::Avalanche => "avalanche",
            SourceDomain::Optimism => "optimism",
            SourceDomain::Arbitrum => "arbitrum",
            SourceDomain::Noble => "noble",
            SourceDomain::Solana => "solana",
            SourceDomain::Base => "base",
            SourceDomain::Polygon => "polygon",
        }
    }
}

impl fmt::Display for SourceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u32> for SourceDomain {
    type Error = u32;

    fn try_from(domain: u32) -> Result<Self, Self::Error> {
        match domain {
            1 => Ok(SourceDomain::Avalanche),
            2 => Ok(SourceDomain::Optimism),
            3 => Ok(SourceDomain::Arbitrum),
            4 => Ok(SourceDomain::Noble),
            5 => Ok(SourceDomain::Solana),
            6 => Ok(SourceDomain::Base),
            7 => Ok(SourceDomain::Polygon),
            wrong => Err(wrong),
        }
    }
}

/// Whether `domain` is a source the intake admits jobs for.
pub fn is_recognized_source(domain: u32) -> bool {
    SourceDomain::try_from(domain).is_ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_domain_is_not_a_source() {
        assert!(!is_recognized_source(LOCAL_DOMAIN));
    }

    #[test]
    fn round_trips_known_domains() {
        for id in 1..=7u32 {
            let domain = SourceDomain::try_from(id).unwrap();
            assert_eq!(domain as u32, id);
        }
        assert_eq!(SourceDomain::try_from(8), Err(8));
    }
}
