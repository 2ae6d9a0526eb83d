//! HTTP/1.1 request parsing, response rendering, and routing, built as a
//! [`waterwheel_core::ProcessRequest`] collaborator.

pub mod h1;
pub mod method;
pub mod process;
pub mod raw_request;
pub mod router;
pub mod status;
pub mod version;

pub use h1::{H1Request, ParseError, Response};
pub use method::Method;
pub use process::{H1Processor, H1Scratch, Handler};
pub use router::Router;
pub use status::Status;
pub use version::Version;
