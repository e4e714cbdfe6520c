pub mod densities;
pub mod errors;
pub mod history;
pub mod importance;
pub mod indicators;
pub mod io;
pub mod metropolis;
pub mod mixture;
pub mod pmc;
pub mod stats;
