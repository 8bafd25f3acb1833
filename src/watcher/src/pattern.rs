//! Glob matching against a watch's positive and ignore patterns.

use crate::config::WatchConfig;
use std::path::Path;

/// `path` passes `watch`'s filter when no ignore pattern matches its
/// filename or full path, and at least one positive pattern matches.
#[must_use]
pub fn matches_file(watch: &WatchConfig, path: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str());

    for pattern in watch.effective_ignore_patterns() {
        if glob_matches(pattern, path, file_name) {
            return false;
        }
    }

    watch
        .patterns
        .iter()
        .any(|pattern| glob_matches(pattern, path, file_name))
}

fn glob_matches(pattern: &str, path: &Path, file_name: Option<&str>) -> bool {
    let Some(compiled) = compile(pattern) else {
        return false;
    };
    if compiled.matches_path(path) {
        return true;
    }

    // A pattern containing a separator (e.g. `.git/*`) names a relative
    // location anywhere under the watch root, not just at its top level.
    if pattern.contains('/') {
        if let Some(anchored) = compile(&format!("**/{}", pattern)) {
            if anchored.matches_path(path) {
                return true;
            }
        }
    }

    file_name.is_some_and(|name| compiled.matches(name))
}

fn compile(pattern: &str) -> Option<glob::Pattern> {
    match glob::Pattern::new(pattern) {
        Ok(p) => Some(p),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "invalid glob pattern, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn watch() -> WatchConfig {
        let mut w = WatchConfig::new("/tmp/docs", "docs");
        w.patterns = vec!["*.md".to_owned()];
        w
    }

    #[test]
    fn test_matching_extension_passes() {
        let w = watch();
        assert!(matches_file(&w, &PathBuf::from("/tmp/docs/note.md")));
    }

    #[test]
    fn test_non_matching_extension_is_rejected() {
        let w = watch();
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/note.txt")));
    }

    #[test]
    fn test_default_ignore_patterns_apply_even_when_positive_pattern_matches() {
        let mut w = watch();
        w.patterns = vec!["**/*".to_owned()];
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/.DS_Store")));
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/note.md.swp")));
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/note.md~")));
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/.git/HEAD")));
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/draft.tmp")));
    }

    #[test]
    fn test_custom_ignore_pattern_beats_positive_pattern() {
        let mut w = watch();
        w.patterns = vec!["**/*".to_owned()];
        w.ignore_patterns = vec!["secret-*".to_owned()];
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/secret-notes.md")));
        assert!(matches_file(&w, &PathBuf::from("/tmp/docs/public.md")));
    }

    #[test]
    fn test_ignore_pattern_checked_against_filename_too() {
        let mut w = watch();
        w.patterns = vec!["**/*".to_owned()];
        w.ignore_patterns = vec!["draft.md".to_owned()];
        assert!(!matches_file(&w, &PathBuf::from("/tmp/docs/nested/draft.md")));
    }
}
