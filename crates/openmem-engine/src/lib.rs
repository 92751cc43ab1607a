mod context;
mod diff;
mod extract;
mod search;

pub use context::{CompactionContext, ContextOptions, assemble_compaction, assemble_context};
pub use diff::{FieldDiff, diff_revisions};
pub use extract::{EntityExtraction, EntityExtractor, store_extraction};
pub use search::{SearchOptions, search};
