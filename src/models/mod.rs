pub mod capability;
pub mod connection;
pub mod execution;
pub mod hint;
pub mod index;
pub mod plan;

pub use capability::*;
pub use connection::*;
pub use execution::*;
pub use hint::*;
pub use index::*;
pub use plan::*;
