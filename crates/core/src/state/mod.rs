pub mod checkpoints;
pub mod db;
pub mod io;

pub use checkpoints::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use db::BeaconDb;
