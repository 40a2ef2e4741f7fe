//! Helpers for the integration tests: database setup and scripted gateway/queue doubles.

pub mod mock_gateway;
pub mod prepare_env;
pub mod recording_queue;

pub use mock_gateway::MockGateway;
pub use prepare_env::{create_database, prepare_test_env, random_db_path, run_migrations};
pub use recording_queue::RecordingQueue;
