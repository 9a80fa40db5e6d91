//! Transport-facing types: what comes in with a request and what goes out.

pub mod dispatch;
pub mod request;

pub use dispatch::{BindingSender, Dispatch, HttpDispatcher, OutboundMessage};
pub use request::{BasicCredentials, RequestContext};
