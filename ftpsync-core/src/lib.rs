//! ftpsync core library — domain types, project registry persistence, errors.
//!
//! - [`types`] — newtypes and profile structs
//! - [`error`] — [`RegistryError`]
//! - [`registry`] — add / update / remove / list / select

pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use types::{
    CredentialRef, Credentials, ProjectId, ProjectName, ProjectProfile, Protocol, RemoteTarget,
    SyncSettings,
};
