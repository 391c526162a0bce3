//! HTTP layer
//!
//! [`HttpClient`] builds requests for the batch endpoint and the settings
//! CDN and classifies responses. Requests go out through a [`Transport`],
//! which is `reqwest` in production and a scripted stand-in under test.

mod client;
mod transport;

pub use client::{authorization_header, classify_upload_status, HttpClient, RequestFactory, UploadOutcome};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
