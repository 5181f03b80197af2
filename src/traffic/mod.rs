pub mod attributor;
pub mod direction;
pub mod prefix;

pub use attributor::{AttributionSummary, TrafficAttributor};
pub use direction::{classify, FlowDirection, TrackedDirection};
pub use prefix::{PrefixKey, PrefixPolicy};
