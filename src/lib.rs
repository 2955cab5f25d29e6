pub mod analysis;
pub mod dist;
pub mod float;
pub mod kernel;
pub mod qnet;
pub mod queue;
pub mod stats;

/// default confidence level for interval estimators
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
/// default target relative precision for analyzable statistics
pub const DEFAULT_RELATIVE_PRECISION: f64 = 0.04;
/// sentinel for "no limit" observation counts
pub const OBSERVATIONS_INFINITY: usize = usize::MAX;

// transient detection parameters (Pawlikowski 1990, rule R5 + Schruben test)
pub const MIN_MEAN_CROSSINGS: usize = 25;
pub const DEFAULT_GAMMA: f64 = 0.5;
pub const DEFAULT_GAMMA_V: f64 = 2.0;
pub const DEFAULT_N_V: usize = 100;
pub const DEFAULT_ALPHA_T: f64 = 0.05;
pub const DEFAULT_N_AP: usize = 25;
pub const DEFAULT_DELTA: usize = 2;
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.0;
pub const DEFAULT_EPS: f64 = 1e-5;

// batch size detection parameters (Pawlikowski 1990)
pub const DEFAULT_M0: usize = 50;
pub const DEFAULT_K_B0: usize = 100;
pub const DEFAULT_BETA: f64 = 0.1;

// replication control parameters
pub const DEFAULT_MIN_REPLICATION_DURATION: f64 = 1.0;
pub const DEFAULT_MIN_NUM_REPLICATIONS: usize = 5;

// batch means parameters
pub const DEFAULT_MIN_NUM_BATCHES: usize = 10;
pub const DEFAULT_SCHMEISER_BATCHES: usize = 30;

/// errors surfaced by the construction and control APIs.
/// handlers running inside the dispatch loop log instead of returning.
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("logic error: {0}")]
    Logic(String),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// initialize terminal logging for examples and ad-hoc runs
#[cfg(feature = "logger")]
pub fn init() {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("initialize logger");
}
