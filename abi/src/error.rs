//! Error kinds surfaced to a library caller (spec.md §7).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OmxError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid parameter list")]
    InvalidParameterList,
    #[error("invalid parameter key")]
    InvalidParameterKey,
    #[error("invalid parameter value")]
    InvalidParameterValue,
    #[error("endpoint already open")]
    Busy,
    #[error("peer table is full")]
    PeerTableFull,
    #[error("not initialized")]
    NotInitialized,
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("no such device")]
    NoDevice,
    #[error("no driver attached")]
    NoDriver,
    #[error("operation requires a capability the caller lacks")]
    AccessDenied,
    #[error("operation timed out")]
    Timeout,
    #[error("remote endpoint closed")]
    RemoteEndpointClosed,
    #[error("remote endpoint id is bad")]
    RemoteEndpointBadId,
    #[error("remote endpoint connection key is bad")]
    RemoteEndpointBadConnectionKey,
    #[error("remote endpoint session is stale")]
    RemoteEndpointBadSession,
    #[error("remote RDMA window id is bad")]
    RemoteRdmaWindowBadId,
    #[error("message truncated")]
    MessageTruncated,
    #[error("message aborted by malformed remote payload")]
    MessageAborted,
    #[error("no system resources")]
    NoSystemResources,
    #[error("no local resources")]
    NoLocalResources,
    #[error("bad endpoint parameter list")]
    EndpointBadParameterList,
    #[error("bad endpoint parameter key")]
    EndpointBadParameterKey,
    #[error("bad endpoint parameter value")]
    EndpointBadParameterValue,
    #[error("kernel ABI version mismatch")]
    BadKernelAbi,
    #[error("library ABI version mismatch")]
    BadLibraryAbi,
    #[error("endpoint is closed")]
    EndpointClosed,
    #[error("endpoint index is out of range")]
    BadEndpoint,
    #[error("region is not pinned")]
    RegionNotPinned,
    #[error("region pinning failed")]
    RegionPinningFailed,
}

pub type OmxResult<T = ()> = Result<T, OmxError>;
