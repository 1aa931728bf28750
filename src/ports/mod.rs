pub mod handler;

pub use handler::{BoxHandler, RequestHandler};
