use std::sync::LazyLock;

use crate::build_info::git_dirty;
use crate::build_info::BUILD_INFO;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{}{}",
        env!("IMAGE_VERSION"),
        BUILD_INFO.commit_sha1.unwrap_or("unknown"),
        if git_dirty() { "-dirty" } else { "" }
    )
});

/// Branch the binary was built from, if the build had git metadata.
pub fn branch() -> Option<&'static str> {
    BUILD_INFO.branch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_carries_image_and_commit() {
        assert!(VERSION.starts_with(env!("IMAGE_VERSION")));
        assert_eq!(VERSION.ends_with("-dirty"), git_dirty());
    }
}
