pub mod file_service;
pub mod image_normalizer;
pub mod remote_fetch;
pub mod storage;
