pub mod observer;
pub mod planner;
pub mod reader;
pub mod schema;
pub mod store;

pub use observer::ArchiveObserver;
pub use planner::{PlannerFields, PlannerStep};
pub use reader::ArchiveReader;
pub use store::RunArchiveStore;
