use std::fmt;
use std::sync::Arc;

/// A collaborator that may be missing at runtime (no `tesseract` binary, no
/// translation endpoint configured). Callers check once, at construction,
/// instead of probing at every use.
pub enum Capability<T: ?Sized> {
    Available(Arc<T>),
    Unavailable { reason: String },
}

impl<T: ?Sized> Capability<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Capability::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Capability::Available(value) => Some(value),
            Capability::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Capability::Available(_) => None,
            Capability::Unavailable { reason } => Some(reason),
        }
    }
}

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        match self {
            Capability::Available(value) => Capability::Available(Arc::clone(value)),
            Capability::Unavailable { reason } => Capability::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl<T: ?Sized> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Available(_) => f.write_str("Available"),
            Capability::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn available_capability_exposes_value() {
        let greeter: Arc<dyn Greeter> = Arc::new(Hello);
        let cap: Capability<dyn Greeter> = Capability::Available(greeter);
        assert!(cap.is_available());
        assert_eq!(cap.reason(), None);
        assert_eq!(cap.get().map(|g| g.greet()).as_deref(), Some("hello"));
        assert!(cap.clone().is_available());
    }

    #[test]
    fn unavailable_capability_keeps_reason() {
        let cap: Capability<dyn Greeter> = Capability::unavailable("binary not found");
        assert!(cap.get().is_none());
        assert_eq!(cap.reason(), Some("binary not found"));
        assert_eq!(format!("{:?}", cap), r#"Unavailable { reason: "binary not found" }"#);
    }
}
