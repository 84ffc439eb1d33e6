//! Utility functions for common operations.
//!
//! - **URL validation**: scheme checks for operator-supplied feed URLs and
//!   SSRF-aware resolution of links found inside untrusted feed documents
//!
//! # Examples
//!
//! ```
//! use atomimport::util::{resolve_link, validate_feed_url};
//!
//! let root = validate_feed_url("https://data.example.org/datasets.atom").unwrap();
//! let prev = resolve_link(&root, "datasets-1.atom", root.host_str()).unwrap();
//! assert_eq!(prev.as_str(), "https://data.example.org/datasets-1.atom");
//! ```

mod url_validator;

pub use url_validator::{filename_from_url, resolve_link, validate_feed_url, UrlValidationError};
