//! Utility modules.

pub mod file;
pub mod lock;
pub mod retry;
pub mod text;

pub use file::{
    FileStamp, atomic_write, calculate_checksum, file_stamp, is_excluded, is_text_file,
    read_file_content, temp_sibling,
};
pub use lock::FileLock;
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
pub use text::{count_words, has_meaningful_content, keyword_tags};
