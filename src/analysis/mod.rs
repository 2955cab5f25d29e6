pub mod batch_means;
pub mod batch_size;
pub mod num_replications;
pub mod replication_size;
pub mod replications;
pub mod spectral;
pub mod transient;

pub use batch_means::*;
pub use batch_size::*;
pub use num_replications::*;
pub use replication_size::*;
pub use replications::*;
pub use spectral::*;
pub use transient::*;

/// a buffered weighted observation
pub type Sample = (f64, f64);
