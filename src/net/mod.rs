//! Network side of the relay: the request/response model, the transport seam and
//! the timeout-bounded fetcher every network attempt goes through.

mod client;
mod fetcher;
mod types;

pub use client::{HttpTransport, Transport};
pub use fetcher::{TimeoutBoundedFetcher, DEFAULT_TIMEOUT};
pub use types::{RequestDescriptor, RequestMode, ResponseRecord, ResponseSource, Served};
