//! Generated gRPC client for the storage-node control surface.
//! The `.proto` definitions live under `proto/`; `build.rs` feeds them
//! through `tonic-build` and this module re-exports the generated types and
//! client under a single `mayastor` namespace, matching the historical
//! mayastor gRPC crate layout.

pub mod mayastor {
    tonic::include_proto!("mayastor");

    /// Connected client, parameterised the same way as every other
    /// tonic-generated client in this workspace.
    pub type MayastorClient<T> = mayastor_client::MayastorClient<T>;
}
