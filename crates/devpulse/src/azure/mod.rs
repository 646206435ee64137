//! Azure DevOps activity source.
//!
//! # Module Structure
//!
//! - [`error`] - `AzureError` and its mapping onto `PlatformError`
//! - [`types`] - REST payloads
//! - [`client`] - `AzureDevOpsClient`, the `ActivitySource` implementation
//! - [`convert`] - payload conversion to platform records
//!
//! ```ignore
//! use devpulse::azure::AzureDevOpsClient;
//!
//! let client = AzureDevOpsClient::new(std::time::Duration::from_secs(30))?;
//! let page = client.fetch_page(&request).await?;
//! ```

mod client;
mod convert;
mod error;
mod types;

pub use client::{AZURE_DEVOPS_HOST, AzureDevOpsClient, DEFAULT_API_VERSION};
pub use error::AzureError;
pub use types::{
    AzureComment, AzureCommit, AzureIdentity, AzurePullRequest, AzureReviewer, AzureThread,
};
