pub mod filter;
pub mod selector;
pub mod smoothing;
pub mod strategies;

pub use filter::DisplayTarget;
pub use selector::{QualityDecision, QualitySelector};
pub use strategies::StrategyKind;
