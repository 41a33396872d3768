use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Normalized absolute path at which a backend is attached.
///
/// Normalization is purely lexical: `.` components are dropped, `..` removes
/// the previous component (never climbing above `/`), and the result is
/// always rooted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(PathBuf);

impl Alias {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut normalized = PathBuf::from("/");
        for component in path.as_ref().components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Self(normalized)
    }

    pub fn root() -> Self {
        Self(PathBuf::from("/"))
    }

    pub fn is_root(&self) -> bool {
        self.0.parent().is_none()
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for Alias {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Alias::new("/data").as_path(), Path::new("/data"));
        assert_eq!(Alias::new("data/").as_path(), Path::new("/data"));
        assert_eq!(Alias::new("/a/./b/../c").as_path(), Path::new("/a/c"));
        assert_eq!(Alias::new("/../../x").as_path(), Path::new("/x"));
        assert_eq!(Alias::new("//a//b").as_path(), Path::new("/a/b"));
    }

    #[test]
    fn test_root_alias() {
        assert!(Alias::new("").is_root());
        assert!(Alias::new("/").is_root());
        assert!(Alias::new("/a/..").is_root());
        assert!(!Alias::new("/a").is_root());
        assert_eq!(Alias::root().to_string(), "/");
    }
}
