pub mod database; // Controllers for every supported engine
pub mod pull; // Runtime data collection over any controller
pub mod registry;

pub use database::{create_controller, DbController};
pub use pull::{pull, DataProduct, PullRequest, PullResponse};
pub use registry::{ControllerId, ControllerRegistry, ControllerSummary, SharedController};
