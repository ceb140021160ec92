// Credential management module
// Rotates a pool of API keys across retried remote calls

pub mod dispatcher;
pub mod pool;

pub use dispatcher::{DispatchError, Failure, ResilientDispatcher};
pub use pool::{Credential, CredentialPool};
