//! Layout-aware HTML template rendering
//!
//! Templates live under a root directory as `<name>.html`. A render compiles the
//! master layout, the named template and the configured partials into one tera
//! set, caches it per escape mode and reuses it for every later render of the
//! same name.

mod cache;
pub mod definition;
pub mod delimiters;
pub mod engine;
pub mod helpers;
pub mod source;

pub use definition::{HelperFunction, HelperTable, TemplateDefinition, TemplateOverride};
pub use delimiters::Delimiters;
pub use engine::{Escape, TemplateEngine, CONTENT_VARIABLE};
pub use source::{FileSystemSource, MemorySource, TemplateSource};
