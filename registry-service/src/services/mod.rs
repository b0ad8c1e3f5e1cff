pub mod dynamo;
pub mod filesystem;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod postgres;
pub mod sources;
pub mod storage;
pub mod stores;

pub use dynamo::DynamoBackend;
pub use filesystem::{FilesystemModuleStore, FilesystemOrganizationStore};
pub use memory::MemoryBackend;
pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoBackend;
pub use postgres::PostgresBackend;
pub use sources::{GithubProvider, ProviderError, ProviderRegistry, SourceProvider, SourceRequest};
pub use storage::{build_storage, FilesystemStorage, ObjectStorage, S3Storage, StorageError};
pub use stores::{
    ModuleStore, OrganizationStore, Page, StoreError, Stores, VcsConnectionStore,
};
