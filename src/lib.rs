//! Feed indexing and pagination for a content platform.
//!
//! Posts live in a primary store with secondary indexes (global feed, tags,
//! authors) kept consistent by atomic multi-item writes. Reads route each
//! feed request to one index, page by creation-timestamp cursors and
//! hydrate the resulting keys into full posts.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;
pub mod web;
