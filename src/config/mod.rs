pub mod settings;

pub use settings::{AwsSecretSettings, Credentials, SecretBackend, Settings};
