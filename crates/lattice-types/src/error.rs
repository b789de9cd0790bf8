//! Error strata for the consensus core (§7).
//!
//! Three strata, each its own enum, composed into [`LatticeError`]:
//! format/corruption (`DataError`), protocol (`ConsensusProtocolError`), and
//! VM (`VmErrorKind`, carried inside `BlockResult` rather than propagated —
//! see `lattice-vm`).

use thiserror::Error;

/// Assigns a stable, machine-readable code to an error variant, matching the
/// pattern used across the teacher's `ioi-types::error` module.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

/// Stratum 1 (§7): format/corruption. Fatal for the operation that hit it.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },
    #[error("malformed cell encoding: {0}")]
    MalformedEncoding(String),
    #[error("unknown type tag: 0x{0:02x}")]
    UnknownTag(u8),
    #[error("hash not found in store: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl ErrorCode for DataError {
    fn code(&self) -> &'static str {
        match self {
            Self::HashMismatch { .. } => "DATA_HASH_MISMATCH",
            Self::MalformedEncoding(_) => "DATA_MALFORMED_ENCODING",
            Self::UnknownTag(_) => "DATA_UNKNOWN_TAG",
            Self::NotFound(_) => "DATA_NOT_FOUND",
            Self::Backend(_) => "DATA_BACKEND_ERROR",
        }
    }
}

/// Stratum 2 (§7): protocol errors. The offending input is dropped; the
/// `Peer` value continues; these are surfaced as telemetry, not propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusProtocolError {
    #[error("signature verification failed for peer {0}")]
    BadSignature(String),
    #[error("peer {0} is not a registered staked peer")]
    UnstakedPeer(String),
    #[error("computed consensus point {new} would recede below current {current}")]
    RecedingConsensus { current: u64, new: u64 },
    #[error("consensus point {point} exceeds proposal point {proposal_point}")]
    ConsensusAheadOfProposal { point: u64, proposal_point: u64 },
}

impl ErrorCode for ConsensusProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadSignature(_) => "PROTOCOL_BAD_SIGNATURE",
            Self::UnstakedPeer(_) => "PROTOCOL_UNSTAKED_PEER",
            Self::RecedingConsensus { .. } => "PROTOCOL_RECEDING_CONSENSUS",
            Self::ConsensusAheadOfProposal { .. } => "PROTOCOL_CONSENSUS_AHEAD_OF_PROPOSAL",
        }
    }
}

/// Stratum 3 (§7, §4.4): VM error kinds. Contained inside a `BlockResult`;
/// never propagated past a transaction boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmErrorKind {
    #[error("NOBODY: no account at the given address")]
    Nobody,
    #[error("UNDECLARED: unresolved symbol '{0}'")]
    Undeclared(String),
    #[error("ARGUMENT: {0}")]
    Argument(String),
    #[error("CAST: {0}")]
    Cast(String),
    #[error("STATE: {0}")]
    State(String),
    #[error("TRUST: {0}")]
    Trust(String),
    #[error("FUNDS: insufficient balance")]
    Funds,
    #[error("MEMORY: {0}")]
    Memory(String),
    #[error("ASSERT: {0}")]
    Assert(String),
    #[error("JUICE: juice exhausted")]
    Juice,
    #[error("SEQUENCE: expected sequence {expected}, got {got}")]
    Sequence { expected: u64, got: u64 },
}

impl ErrorCode for VmErrorKind {
    fn code(&self) -> &'static str {
        match self {
            Self::Nobody => "VM_NOBODY",
            Self::Undeclared(_) => "VM_UNDECLARED",
            Self::Argument(_) => "VM_ARGUMENT",
            Self::Cast(_) => "VM_CAST",
            Self::State(_) => "VM_STATE",
            Self::Trust(_) => "VM_TRUST",
            Self::Funds => "VM_FUNDS",
            Self::Memory(_) => "VM_MEMORY",
            Self::Assert(_) => "VM_ASSERT",
            Self::Juice => "VM_JUICE",
            Self::Sequence { .. } => "VM_SEQUENCE",
        }
    }
}

/// Top-level error composing the three strata, returned by fallible public
/// operations that are not themselves BlockResult-contained.
#[derive(Error, Debug)]
pub enum LatticeError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Protocol(#[from] ConsensusProtocolError),
    #[error("a programmer bug: our own signature failed to verify")]
    OwnSignatureInvalid,
}
