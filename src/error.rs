// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crate-wide error type.
//!
//! Every fallible operation in the protocol core reports one of these kinds. There are no
//! retries anywhere in the crate; a failed transition leaves the originating state untouched.
use thiserror::Error;

use crate::crypto::RngError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("tree index out of range")]
    InvalidIndex,

    #[error("path does not match tree: {0}")]
    InvalidPath(&'static str),

    #[error("transmitted public keys disagree with re-derivation")]
    IncompatibleNodes,

    #[error("required private key is not available")]
    MissingNode,

    #[error("no state available for this group and epoch")]
    MissingState,

    #[error("unknown handshake operation tag {0}")]
    InvalidMessageType(u8),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("malformed TLS syntax: {0}")]
    TlsSyntax(&'static str),

    #[error(transparent)]
    Rng(#[from] RngError),
}
