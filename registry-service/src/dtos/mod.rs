pub mod modules;
pub mod organizations;
pub mod pagination;
pub mod sources;
pub mod vcs;

pub use modules::ModuleResponse;
pub use organizations::{CreateOrganizationRequest, OrganizationResponse, UpdateOrganizationRequest};
pub use pagination::PageParams;
pub use sources::SourceRequestBody;
pub use vcs::{CallbackParams, VcsConnectionRequest};
