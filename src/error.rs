// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supernode error types.

use thiserror::Error;

use crate::wire::CodecError;

/// Top-level error type for the supernode process.
#[derive(Debug, Error)]
pub enum SupernodeError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("coordinator message received before READY: {0}")]
    NotReady(&'static str),
}

/// Policy-level drop reasons. Never propagated as `Result::Err` - these are
/// logged at trace/debug level and otherwise silently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TtlExpired,
    UnknownUnicastMac,
    MulticastRegisterDestination,
    DecodeFailed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TtlExpired => write!(f, "ttl expired"),
            Self::UnknownUnicastMac => write!(f, "unknown unicast destination MAC"),
            Self::MulticastRegisterDestination => {
                write!(f, "REGISTER addressed to a multicast/broadcast MAC")
            }
            Self::DecodeFailed => write!(f, "malformed datagram"),
        }
    }
}
