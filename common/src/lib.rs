pub mod blob;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod error;
pub mod invocation;
pub mod job;
pub mod layout;
pub mod processor;
pub mod reconcile;
pub mod storage;
pub mod task;
pub mod worker;

pub use blob::{
    AccessGrant, AccessPermission, AccessRequest, BlobPage, ListBlobsQuery, NamespaceCreated,
    SigQuery,
};
pub use chunk::{split_into_chunks, Chunk};
pub use config::{ProcessorSettings, StorageConfig, WorkerSettings};
pub use error::{ConfigError, DiscoveryError, InvocationError, ProcessError, StorageError};
pub use invocation::{run_invocation, InvocationSummary};
pub use job::{JobId, JobInfo, JobRequest, JobStatus, OnAllTasksComplete};
pub use storage::{BlobStore, HttpBlobStore, MemoryBlobStore};
pub use task::{
    AddTasksResponse, ResourceFile, Task, TaskId, TaskInfo, TaskResult, TaskSpec, TaskState,
};
pub use worker::{
    TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest, TaskCompleteResponse,
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
