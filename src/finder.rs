// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// FileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FileFinder {
    /// Create a new FileFinder with the given include and exclude patterns
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Find all files matching the include patterns, excluding those matching exclude patterns
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            'matches: for entry in matches {
                let path = entry.map_err(|e| Error::Io(e.into_error()))?;

                // Skip directories
                if path.is_dir() {
                    continue;
                }

                // Check exclude patterns
                for exclude in &self.exclude {
                    if let Ok(exclude_matches) = glob(exclude) {
                        for exclude_entry in exclude_matches.flatten() {
                            if path == exclude_entry {
                                continue 'matches;
                            }
                        }
                    }

                    // Also try pattern matching directly
                    if let Ok(pattern) = glob::Pattern::new(exclude) {
                        if pattern.matches_path(&path) {
                            continue 'matches;
                        }
                    }
                }

                // Add to result if not seen
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}
