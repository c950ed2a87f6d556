//! SEC EDGAR source adapters.
//!
//! Two clients produce the same canonical filing record:
//! - [`efts::EftsClient`] pages through the EDGAR full-text search API
//!   (EFTS) for a date range, one query per form kind.
//! - [`daily_index::DailyIndexClient`] fetches and parses one day's master
//!   daily index file.
//!
//! Both normalize heterogeneous upstream fields (zero-padded CIKs, display
//! names with embedded tickers, archive filenames) into [`types::CanonicalFiling`]
//! and run a best-effort IPO phrase confirmation against the filing document
//! for initial registration forms.

pub mod confirm;
pub mod daily_index;
pub mod efts;
pub mod error;
pub mod html;
pub mod normalize;
pub mod retry;
pub mod types;

pub use daily_index::{DailyIndexClient, DailyIndexConfig};
pub use efts::{EftsClient, EftsConfig};
pub use error::{FetchError, Result};
pub use retry::{with_retries, RetryPolicy};
pub use types::{AccessionId, CanonicalFiling, Cik, FormKind, IpoConfirmation};
