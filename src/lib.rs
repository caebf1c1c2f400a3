//! Git Smart HTTP server core: pkt-line framing, advertisement/request
//! parsing, upload-pack object closure and pack assembly, receive-pack pack
//! ingestion and reference-update transactions, without shelling out to a
//! `git` binary.
//!
//! The crate is organised leaves-first, mirroring the component table: the
//! framing codec and object model at the bottom, the repository port above
//! them, request parsing above that, and the upload-pack/receive-pack
//! orchestration modules at the top. The optional `http` module (feature
//! `axum`, default-on) wires the three routes onto an `axum::Router`; every
//! handler in this crate is independently callable against any dispatch
//! layer, per the "route dispatch is an external collaborator" scoping.

pub mod advertisement;
pub mod closure;
pub mod config;
pub mod error;
pub mod hash;
pub mod objects;
pub mod pack_reader;
pub mod pack_writer;
pub mod pkt_line;
pub mod receive_pack;
pub mod repo_name;
pub mod repository;
pub mod request;
pub mod transaction;
pub mod upload_pack;

#[cfg(feature = "axum")]
pub mod http;

pub use config::{Config, ConfigBuilder};
pub use error::GitHttpError;
pub use hash::ObjectId;
pub use repository::{RepoError, RepositoryPort};
