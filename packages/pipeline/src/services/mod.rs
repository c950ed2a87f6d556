//! Side-effect collaborators invoked by the engine and the run
//! orchestration. Each sits behind a trait with a no-op fallback so a
//! missing credential degrades the feature instead of failing the run.

pub mod analysis;
pub mod estimated_date;
pub mod kv_sync;
pub mod logo;

pub use analysis::{Analyzer, NoopAnalyzer, OpenAiAnalyzer};
pub use estimated_date::EstimatedDateService;
pub use kv_sync::{CloudflareKvExporter, NoopExporter, SnapshotExporter};
pub use logo::{LogoDevService, LogoFields, LogoService, NoopLogoService};
