pub mod file_detection;
pub mod persist;
pub mod test_helpers;
