//! Azure Blob Storage access for citation links.

pub mod credential;
pub mod sas;

pub use credential::AzureCredential;
pub use sas::{BlobSigner, SasTokenService};
