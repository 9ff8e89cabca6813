pub mod backend;
#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod cleaner;
pub mod dom;
pub mod fetcher;
pub mod liveness;
pub mod page_backend;
pub mod remote;
pub mod staff;
pub mod stealth;

pub use backend::{Backend, BackendKind};
#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use cleaner::HtmdCleaner;
pub use fetcher::ReqwestFetcher;
pub use liveness::HttpLivenessProbe;
pub use page_backend::PageBackend;
pub use remote::RemoteBackend;
