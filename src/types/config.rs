/// Engine-wide settings applied while compiling policy text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Root of the managed filesystem; relative `tree`/`path` patterns are prefixed
    /// with it.
    pub fs_root: String,
}

impl EngineConfig {
    #[must_use]
    pub fn new(fs_root: impl Into<String>) -> Self {
        Self {
            fs_root: fs_root.into(),
        }
    }

    /// `fs_root` without trailing slashes.
    #[must_use]
    pub fn root(&self) -> &str {
        self.fs_root.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_strips_trailing_slash() {
        assert_eq!(EngineConfig::new("/lustre/").root(), "/lustre");
        assert_eq!(EngineConfig::new("/").root(), "");
        assert_eq!(EngineConfig::default().root(), "");
    }
}
