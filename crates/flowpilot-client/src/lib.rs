pub mod http;

pub use http::HttpService;
