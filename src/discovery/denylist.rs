//! Major/blue-chip token denylist
//!
//! Stablecoins, wrapped majors and liquid staking tokens always show up at
//! the top of volume and liquidity sorts. They are never discovery
//! candidates, so they are removed before any processing.

use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::error::Result;
use crate::types::TokenSnapshot;

/// Well-known major token addresses
pub const MAJOR_TOKEN_ADDRESSES: &[&str] = &[
    "So11111111111111111111111111111111111111112",  // wSOL
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", // USDC
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", // USDT
    "7dHbWXmci3dT8UFYWYZweBLXgycu7Y3iL6trKn1Y7ARj", // stSOL
    "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So",  // mSOL
    "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn", // JitoSOL
    "3NZ9JMVBmGAqocybic2c8LQCJScmgsAZ6vQqTDzcqmJh", // WBTC (Portal)
    "7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs", // WETH (Portal)
];

/// Default symbol patterns for majors (case-insensitive, whole symbol)
pub const MAJOR_SYMBOL_PATTERNS: &[&str] = &[
    r"(?i)^w?(sol|btc|eth|bnb)$",
    r"(?i)^(usdc|usdt|dai|pyusd|usde|fdusd|tusd)(\.e)?$",
    r"(?i)^(st|m|jito|b|jup)sol$",
];

/// Static collaborator removing majors from provider results
#[derive(Debug, Clone)]
pub struct MajorTokenDenylist {
    addresses: HashSet<String>,
    symbol_patterns: Vec<Regex>,
}

impl MajorTokenDenylist {
    /// Build from the built-in lists plus extra addresses/patterns
    pub fn new(extra_addresses: &[String], extra_patterns: &[String]) -> Result<Self> {
        let mut addresses: HashSet<String> =
            MAJOR_TOKEN_ADDRESSES.iter().map(|s| s.to_string()).collect();
        addresses.extend(extra_addresses.iter().cloned());

        let symbol_patterns = MAJOR_SYMBOL_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(extra_patterns.iter().cloned())
            .map(|p| Regex::new(&p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            addresses,
            symbol_patterns,
        })
    }

    /// Whether the token is a denylisted major
    pub fn is_major(&self, token: &TokenSnapshot) -> bool {
        self.addresses.contains(&token.address)
            || self
                .symbol_patterns
                .iter()
                .any(|p| p.is_match(token.symbol.trim()))
    }

    /// Remove majors from a provider result
    pub fn retain_non_major(&self, tokens: Vec<TokenSnapshot>) -> Vec<TokenSnapshot> {
        let before = tokens.len();
        let kept: Vec<_> = tokens.into_iter().filter(|t| !self.is_major(t)).collect();
        if kept.len() < before {
            debug!(removed = before - kept.len(), "Removed major tokens");
        }
        kept
    }
}

impl Default for MajorTokenDenylist {
    fn default() -> Self {
        Self {
            addresses: MAJOR_TOKEN_ADDRESSES.iter().map(|s| s.to_string()).collect(),
            symbol_patterns: MAJOR_SYMBOL_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}
