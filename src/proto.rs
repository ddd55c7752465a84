//! Generated wire and persistence types.
//!
//! Everything in here comes out of `proto/curator.proto` via
//! `tonic-build` (see `build.rs`): the `Curator`, `CuratorLocal`,
//! `Management` and `Aaa` service stubs plus their messages, and the
//! persisted `NodeRecord` blob format.

tonic::include_proto!("curator.v1");
