use std::fmt::Debug;
use std::hash::Hash;

/// Identity of "the same logical work".
///
/// Two calls with equal keys are duplicates. The key's equality and hash must
/// not change while a call using it is in flight.
pub trait CooperationKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    /// Rendering used in logs and error messages
    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

impl<T> CooperationKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct AssetKey {
        repository: String,
        path: String,
    }

    #[test]
    fn test_describe() {
        assert_eq!("artifact-A".describe(), "\"artifact-A\"");
        assert_eq!(42u64.describe(), "42");

        let key = AssetKey {
            repository: "maven-central".into(),
            path: "org/foo/1.0/foo.jar".into(),
        };
        assert!(key.describe().contains("maven-central"));
    }
}
