use std::fmt;

/// Holds a sensitive value (a store password, a token-signing secret) and refuses to print it.
///
/// The wrapped value is only reachable through [`reveal`](Secret::reveal), so it cannot leak
/// through `Debug` or `Display` formatting, and every intentional use is greppable.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn reveal(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<hidden>)")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<hidden>")
    }
}

#[cfg(test)]
mod test {
    use super::Secret;

    #[test]
    fn secrets_do_not_leak_through_formatting() {
        let secret = Secret::new("hunter2".to_string());
        assert_eq!(format!("{secret}"), "<hidden>");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.reveal().as_str(), "hunter2");
        assert_eq!(secret.into_inner(), "hunter2");
    }
}
