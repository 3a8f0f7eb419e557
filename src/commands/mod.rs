//! CLI commands implementation

pub mod crawl;
pub mod init;
pub mod links;
pub mod prices;
pub mod purge;
pub mod schedule;
pub mod serve;
pub mod status;

pub use crawl::*;
pub use init::*;
pub use links::*;
pub use prices::*;
pub use purge::*;
pub use schedule::*;
pub use serve::*;
pub use status::*;
