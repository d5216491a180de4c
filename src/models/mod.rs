pub mod descriptor;
pub mod plan;
pub mod task;

pub use descriptor::*;
pub use plan::*;
pub use task::*;
