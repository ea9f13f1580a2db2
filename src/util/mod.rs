//! Utility functions shared by the collaborators.
//!
//! - **URL checks**: SSRF validation for imported addresses, host matching
//! - **Text cleanup**: control-sequence stripping for untrusted feed text
//! - **Rate limiting**: sliding-window limiter for outbound requests

mod rate_limit;
mod text;
mod url_validator;

pub use rate_limit::RateLimiter;
pub use text::{clean_line, strip_control_chars};
pub use url_validator::{host_matches, http_url, validate_url, UrlValidationError};
