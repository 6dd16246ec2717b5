// Keyed cooperation: duplicate concurrent calls share one execution

pub mod disabled;
pub mod execution;
pub mod factory;
pub mod limiter;
pub mod registry;
pub mod request;

pub use disabled::DisabledCooperation;
pub use execution::{CapacitySnapshot, CheckFn, CooperatingEngine};
pub use factory::{ConfigBuilder, Cooperation, CooperationFactory};
pub use limiter::{CapacityDenial, CapacityLimiter, CapacityPermit};
pub use registry::{ExecutionSnapshot, ExecutionState, InFlightExecution, InFlightRegistry};
pub use request::CooperationRequest;
