//! Wire-level pieces of the S3 multipart protocol
//!
//! The engine depends only on the [`Transport`] and [`RequestSigner`]
//! capabilities; concrete HTTP and credential handling plug in from outside.
//! Enable the `http-transport` feature for a reqwest-backed transport.

pub mod signer;
pub mod transport;
pub mod xml;

#[cfg(feature = "http-transport")]
pub mod http;

pub use signer::{AnonymousSigner, RequestSigner, SigningRequest};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, Transport};

#[cfg(feature = "http-transport")]
pub use http::HttpTransport;
