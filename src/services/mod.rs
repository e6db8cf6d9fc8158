pub mod aws_secrets;
pub mod local_store;
pub mod secrets;

pub use aws_secrets::AwsSecretStore;
pub use local_store::LocalFileStore;
pub use secrets::{SecretStore, SecretStoreBackend};
