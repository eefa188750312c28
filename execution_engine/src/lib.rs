pub mod backend;
pub mod coordinator;
pub mod hooks;

pub use backend::{
    BackendDescription, BackendSettings, CloudBackend, ContainerEngineBackend, InMemoryBackend,
    OrchestratorBackend, ScalingBackend, ScalingResult,
};
pub use coordinator::{ActiveScalings, ExecutionCoordinator};
pub use hooks::{HookPhase, HookSink, HttpHookSink, NullHookSink};
