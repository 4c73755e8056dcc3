pub mod catalog;
pub mod config;
pub mod errors;
pub mod keyfile;
pub mod metadata;
pub mod policy;
pub mod refspec;
pub mod remote;
pub mod resolve;

pub use catalog::{FullRef, RefCatalog, RefEntry, RelatedEntry, RelatedRef, Summary, SummaryFormat, SummaryInfo};
pub use config::ImageConfig;
pub use errors::Error;
pub use keyfile::{KeyFile, KeyFileError};
pub use metadata::RefMetadata;
pub use policy::PolicyViolation;
pub use refspec::{PartialRef, RefId, RefKind};
pub use remote::RemoteConfig;
pub use resolve::{InstallCandidate, InstallSet, Resolver};
