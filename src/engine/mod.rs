//! Engine wiring and the pluggable store seam

pub mod builder;
pub mod stubs;
pub mod traits;

pub use builder::{EventEngine, EventEngineBuilder};
pub use stubs::InMemoryBitmapStore;
pub use traits::BitmapStore;
