/// Default page size for list endpoints
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Largest page size a caller may request
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Content type under which dataset documents are stored
pub const DATASET_CONTENT_TYPE: &str = "text/markdown";

/// Default per-user dataset quota
pub const DEFAULT_MAX_DATASETS_PER_USER: u32 = 10;

/// Default maximum dataset content size in bytes (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Accepted upload file extensions
pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Maximum length of a generated download file stem
pub const MAX_FILENAME_STEM: usize = 50;
