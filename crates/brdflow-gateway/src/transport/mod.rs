mod http;
mod stdio;

pub use http::HttpToolTransport;
pub use stdio::StdioToolTransport;
