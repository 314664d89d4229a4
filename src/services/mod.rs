#[cfg(test)]
pub mod fake;
mod freshrss;
pub mod reader_api;

pub use freshrss::FreshRssClient;
pub use reader_api::ReaderApi;
