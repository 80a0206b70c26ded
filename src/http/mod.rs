pub mod connection;
pub mod request;
pub mod response;

pub use request::{find_subsequence, unchunk, ConnectionHint, HttpRequest, Method, RecvStatus};
pub use response::{get_mime_type, Headers, HttpResponse, SendStatus};
