pub mod audit;
pub mod cluster;
pub mod document;
pub mod fingerprint;
pub mod issue;

pub use audit::*;
pub use cluster::*;
pub use document::*;
pub use fingerprint::*;
pub use issue::*;
