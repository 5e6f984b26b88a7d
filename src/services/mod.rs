pub mod model_resolver;

pub use model_resolver::{FallbackConfig, FallbackRule, ModelEntry, ModelTable, ResolveOptions};
