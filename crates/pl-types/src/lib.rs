pub mod errors;
pub mod job;
pub mod search;

pub use errors::*;
pub use job::*;
pub use search::*;
