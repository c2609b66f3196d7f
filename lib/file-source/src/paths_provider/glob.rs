//! [`Glob`] paths provider.

use std::path::PathBuf;

use glob::Pattern;
pub use glob::{MatchOptions, PatternError};

use super::PathsProvider;

/// A glob-based path provider.
///
/// Provides the paths to the files on the file system that match include
/// patterns and don't match the exclude patterns.
pub struct Glob {
    include_patterns: Vec<String>,
    exclude_patterns: Vec<Pattern>,
    glob_match_options: MatchOptions,
}

impl Glob {
    /// Create a new [`Glob`].
    ///
    /// # Errors
    ///
    /// Returns the first invalid include or exclude pattern.
    pub fn new(
        include_patterns: &[String],
        exclude_patterns: &[String],
        glob_match_options: MatchOptions,
    ) -> Result<Self, PatternError> {
        for pattern in include_patterns {
            Pattern::new(pattern)?;
        }
        let exclude_patterns = exclude_patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            include_patterns: include_patterns.to_vec(),
            exclude_patterns,
            glob_match_options,
        })
    }

    fn is_excluded(&self, path: &std::path::Path) -> bool {
        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, self.glob_match_options))
    }
}

impl PathsProvider for Glob {
    fn paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for pattern in &self.include_patterns {
            let Ok(entries) = glob::glob_with(pattern, self.glob_match_options) else {
                continue;
            };
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() && !self.is_excluded(&path) => paths.push(path),
                    Ok(_) => {}
                    Err(error) => {
                        warn!(message = "Failed to read path while globbing.", %error, %pattern);
                    }
                }
            }
        }
        paths.sort();
        paths.dedup();
        paths
    }
}
