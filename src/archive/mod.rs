pub mod audit;
pub mod config;
pub mod directory;
pub mod fetch;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod run;
pub mod snapshot;
pub mod table;
pub mod timestamp;
pub mod util;
