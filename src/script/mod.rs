pub mod cache;
pub mod executor;
pub mod fingerprint;
pub mod launcher;
pub mod lock;
pub mod metadata;
pub mod pipeline;
pub mod process;
pub mod scaffold;

pub use cache::{BuildMode, CacheEntry, CacheError, CacheManager, CleanReport, EntryStatus};
pub use executor::{BuildExecutor, BuildResult, ExecError, OutputMode};
pub use fingerprint::Fingerprint;
pub use launcher::{LaunchError, Launcher};
pub use metadata::{parse_metadata, ParseError, ScriptMetadata};
pub use pipeline::{BuildOutcome, Pipeline, PipelineError, PipelineOptions, PreparedScript};
pub use process::{ExitOutcome, ProcessRunner, SystemRunner};
pub use scaffold::{MetadataPolicy, ScaffoldWriter};
