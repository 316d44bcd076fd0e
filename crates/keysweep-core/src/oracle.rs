//! Fingerprint oracles.
//!
//! A search only needs two things from the fingerprint function: a way to
//! turn the operator's target string into a comparable digest, and the digest
//! of a candidate. Keeping that behind [`Oracle`] lets the scanner compare raw
//! digests instead of formatting hex strings for every candidate.

use crate::{Error, Result};
use md5::{Digest, Md5};

/// Maps candidates to digests that can be compared for equality.
pub trait Oracle: Send + Sync + 'static {
    /// Parsed form of a target fingerprint.
    type Digest: PartialEq + Send + Sync + 'static;

    /// Parses an operator or wire supplied target.
    fn parse_target(&self, target: &str) -> Result<Self::Digest>;

    /// Fingerprint of a single candidate.
    fn fingerprint(&self, candidate: u64) -> Self::Digest;
}

/// MD5 of the candidate's decimal ASCII representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Decimal;

impl Md5Decimal {
    pub const DIGEST_LEN: usize = 16;

    /// Lowercase hex fingerprint, as typed by an operator.
    pub fn hex(candidate: u64) -> String {
        hex::encode(Self.fingerprint(candidate))
    }
}

impl Oracle for Md5Decimal {
    type Digest = [u8; Self::DIGEST_LEN];

    fn parse_target(&self, target: &str) -> Result<Self::Digest> {
        let mut digest = [0_u8; Self::DIGEST_LEN];
        hex::decode_to_slice(target.trim(), &mut digest).map_err(|e| Error::InvalidTarget {
            reason: format!("{target:?} is not a {}-byte hex digest: {e}", Self::DIGEST_LEN),
        })?;
        Ok(digest)
    }

    fn fingerprint(&self, candidate: u64) -> Self::Digest {
        let mut digest = [0_u8; Self::DIGEST_LEN];
        digest.copy_from_slice(&Md5::digest(candidate.to_string().as_bytes()));
        digest
    }
}
