pub mod discovery;
pub mod module;
pub mod organization;
pub mod source;
pub mod vcs_connection;

pub use discovery::{ModuleVersion, ModuleVersions, ModuleVersionsResponse, ServiceDiscovery};
pub use module::{Module, ModuleUpdate, NewModule};
pub use organization::Organization;
pub use source::{SourceData, SourceTag, VcsModule};
pub use vcs_connection::{OAuthClientLink, ResourceLink, VcsConnection, VcsToken};
