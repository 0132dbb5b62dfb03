//! Wire protocol: the cluster message union and the authenticated
//! envelope that frames it.

pub mod envelope;
pub mod message;

pub use envelope::{Envelope, ProtoError, PROTOCOL_VERSION};
pub use message::{
    CallOutcome, ClusterMessage, DownReason, GlobalEntry, RegistryOp, RemoteCallErrorKind,
    SpawnErrorKind, SpawnOptions,
};
