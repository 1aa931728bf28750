pub mod log_format;
pub mod middleware;
pub mod router;
pub mod supervisor;

pub use router::{Route, RouteTable};
pub use supervisor::TaskGroup;
