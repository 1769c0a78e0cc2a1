//! Completion and NACK status codes (spec.md §4.8, §6, §7).

use crate::error::OmxError;

/// Terminal status of a pull handle (spec.md §4.8, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    Success,
    Timeout,
    BadSession,
    EndptClosed,
    BadEndpt,
    BadRdmaWin,
    Aborted,
}

impl PullStatus {
    pub fn is_success(self) -> bool {
        matches!(self, PullStatus::Success)
    }
}

impl From<OmxError> for PullStatus {
    fn from(err: OmxError) -> Self {
        match err {
            OmxError::Timeout => PullStatus::Timeout,
            OmxError::RemoteEndpointBadSession => PullStatus::BadSession,
            OmxError::EndpointClosed | OmxError::RemoteEndpointClosed => PullStatus::EndptClosed,
            OmxError::BadEndpoint | OmxError::RemoteEndpointBadId => PullStatus::BadEndpt,
            OmxError::RemoteRdmaWindowBadId => PullStatus::BadRdmaWin,
            _ => PullStatus::Aborted,
        }
    }
}

/// NACK emitted for a `NACK_LIB` frame: one per class of library-level
/// validation failure (spec.md §4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackLibType {
    BadEndpoint = 0,
    EndpointClosed = 1,
    BadSession = 2,
    BadConnectionKey = 3,
}

impl NackLibType {
    pub fn to_error(self) -> OmxError {
        match self {
            NackLibType::BadEndpoint => OmxError::RemoteEndpointBadId,
            NackLibType::EndpointClosed => OmxError::RemoteEndpointClosed,
            NackLibType::BadSession => OmxError::RemoteEndpointBadSession,
            NackLibType::BadConnectionKey => OmxError::RemoteEndpointBadConnectionKey,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => NackLibType::BadEndpoint,
            1 => NackLibType::EndpointClosed,
            2 => NackLibType::BadSession,
            3 => NackLibType::BadConnectionKey,
            _ => return None,
        })
    }
}

/// NACK emitted for a `NACK_MCP` frame: failures specific to pull/RDMA
/// validation, mapped directly into the pull-done status space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackMcpType {
    BadEndpoint = 0,
    EndpointClosed = 1,
    BadSession = 2,
    BadRdmaWindow = 3,
}

impl NackMcpType {
    pub fn to_pull_status(self) -> PullStatus {
        match self {
            NackMcpType::BadEndpoint => PullStatus::BadEndpt,
            NackMcpType::EndpointClosed => PullStatus::EndptClosed,
            NackMcpType::BadSession => PullStatus::BadSession,
            NackMcpType::BadRdmaWindow => PullStatus::BadRdmaWin,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => NackMcpType::BadEndpoint,
            1 => NackMcpType::EndpointClosed,
            2 => NackMcpType::BadSession,
            3 => NackMcpType::BadRdmaWindow,
            _ => return None,
        })
    }
}
