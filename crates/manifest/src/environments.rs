use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Environment names found in an `environments/` directory.
///
/// Every entry contributes its name up to the first `.`, so `prod.meta`,
/// `prod.creds` and the `prod/` directory all yield `prod`. A missing
/// directory yields nothing.
pub fn discover_wellknown_environments(dir: &Path) -> Result<BTreeSet<String>> {
    if !dir.is_dir() {
        return Ok(BTreeSet::new());
    }
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let file_name = entry?.file_name();
        let file_name = file_name.to_string_lossy();
        let name = file_name.split('.').next().unwrap_or_default();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_cuts_at_first_dot() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("prod.meta"), "").unwrap();
        fs::write(temp.path().join("prod.creds"), "").unwrap();
        fs::write(temp.path().join("qa.meta"), "").unwrap();
        fs::create_dir(temp.path().join("dev")).unwrap();
        fs::write(temp.path().join(".hidden"), "").unwrap();

        let names = discover_wellknown_environments(temp.path()).unwrap();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["dev", "prod", "qa"]);
    }

    #[test]
    fn test_missing_directory() {
        let temp = TempDir::new().unwrap();
        let names = discover_wellknown_environments(&temp.path().join("environments")).unwrap();
        assert!(names.is_empty());
    }
}
