pub mod analyzer;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod dns;
pub mod domain_utils;
pub mod email;
pub mod error;
pub mod fanout;
pub mod ioc;
pub mod reputation;
pub mod response;
pub mod url_resolver;
pub mod verdict;

pub use analyzer::{Analyzer, DetectorSet};
pub use cache::ResponseCache;
pub use config::Config;
pub use email::Eml;
pub use response::Response;
pub use verdict::{Outcome, ReportPolicy, Verdict, VerdictDetail};
