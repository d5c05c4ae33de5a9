pub mod config_tests;
pub mod engine_tests;
pub mod file_discovery_tests;
pub mod merge_tests;
pub mod output_tests;
pub mod property_tests;
pub mod validation_tests;
