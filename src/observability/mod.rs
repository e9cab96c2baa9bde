pub mod traits;

pub use traits::{LogObserver, ReplayObserver};
