//! Service-crate error taxonomy. Handlers map these onto a
//! [`codec::message::StatusCode`] rather than letting them escape to the
//! transport layer as-is — see `routing::status_for`.

use crate::store::images::ImageError;
use crate::store::relations::CardError;
use crate::store::search::SearchError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity not found")]
    NotFound,
    #[error("identity already hosted on this node")]
    AlreadyHosted,
    #[error("hosting quota exceeded")]
    QuotaExceeded,
    #[error("{0}")]
    InvalidValue(String),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("requested callee is not reachable")]
    NotAvailable,
    #[error("request was rejected by the callee")]
    Rejected,
    #[error("this connection's role does not permit the requested operation")]
    BadRole,
    /// Not a failure: the request was accepted but its response will be
    /// sent later, once a third party (the call callee) answers or the
    /// accept window times out. `handlers::handle` turns this into "send
    /// nothing now" rather than an error response.
    #[error("response deferred pending callee answer")]
    Deferred,
}

pub type Result<T> = std::result::Result<T, Error>;
