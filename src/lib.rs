// #![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::default_trait_access)]
#![warn(clippy::ignored_unit_patterns)]
#![warn(clippy::missing_fields_in_debug)]
#![warn(clippy::use_self)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod backoff;
pub mod config;
pub mod error;
mod headers;
pub mod lastfm;
pub mod metadata;
mod poller;
pub mod sink;
pub mod spotify;
mod state;
mod stream;
mod track;

pub use headers::*;
pub use poller::*;
pub use state::*;
pub use stream::*;
pub use track::*;
