//! Upstream platform integration
//!
//! Adapters translating raw platform payloads and listings into
//! intermediary objects, the event routing registry, and the rate/retry
//! guard every outbound upstream call goes through.

pub mod event;
pub mod github;
pub mod pagure;
pub mod retry;

pub use event::{HandlerRegistry, UpstreamEvent};
pub use github::GithubUpstream;
pub use pagure::PagureUpstream;
pub use retry::{RetryConfig, RetryDecision, RetryableError};
