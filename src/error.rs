pub type LoopmuxResult<T> = Result<T, LoopmuxError>;

#[derive(thiserror::Error, Debug)]
pub enum LoopmuxError {
    /// Malformed overlay/group declarations or profile values. Fatal for the
    /// whole run, since the profile is shared by every file.
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant violation in the scheduler. Indicates a bug, fatal.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// External engine failure, carries the engine diagnostics. Isolated to
    /// one file; the batch continues.
    #[error("render error: {0}")]
    Render(String),

    /// Cache index unreadable/unwritable. Degrades to cache-miss, never fatal.
    #[error("cache io error: {0}")]
    CacheIo(String),

    /// Audio file unreadable or unprobeable. Isolated to one file.
    #[error("metadata error: {0}")]
    Metadata(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoopmuxError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn cache_io(msg: impl Into<String>) -> Self {
        Self::CacheIo(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Per-file errors are reported and the batch keeps going; anything else
    /// aborts the run before (or while) other files are in flight.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Render(_) | Self::Metadata(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            LoopmuxError::config("x").to_string().contains("config error:")
        );
        assert!(
            LoopmuxError::schedule("x")
                .to_string()
                .contains("schedule error:")
        );
        assert!(LoopmuxError::render("x").to_string().contains("render error:"));
        assert!(
            LoopmuxError::cache_io("x")
                .to_string()
                .contains("cache io error:")
        );
    }

    #[test]
    fn per_file_classification() {
        assert!(LoopmuxError::render("ffmpeg exploded").is_per_file());
        assert!(LoopmuxError::metadata("bad mp3").is_per_file());
        assert!(!LoopmuxError::config("bad profile").is_per_file());
        assert!(!LoopmuxError::cache_io("index").is_per_file());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = LoopmuxError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
