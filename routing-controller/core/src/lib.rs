#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod naming;
pub mod url;

pub use self::url::{resolve_url, secure_scheme, UrlEndpoint};
