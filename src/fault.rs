//! The value handed to reporters and handlers when a launched task panics.
//!
//! A [`Fault`] owns the panic payload exactly as it was raised. The two
//! payload types produced by the `panic!` macro (`&'static str` for literal
//! messages and `String` for formatted ones) can be read back as text through
//! [`Fault::message`]; any other payload, such as one raised through
//! [`std::panic::panic_any`], stays available through
//! [`Fault::downcast_ref`].
//!
//! ```rust
//! use strandguard::Fault;
//!
//! let fault = Fault::new(format!("worker {} gave up", 3));
//! assert_eq!(fault.message(), Some("worker 3 gave up"));
//! assert!(fault.is::<String>());
//! ```

use core::{any::Any, fmt};

/// An intercepted panic.
///
/// `Fault` is `Send` but not `Sync`, since the payload it carries is only
/// guaranteed to be `Send`.
pub struct Fault {
    payload: Box<dyn Any + Send + 'static>,
}

impl Fault {
    /// Wraps an arbitrary value as a fault.
    ///
    /// Launched tasks never need this; it exists so reporters can be driven
    /// directly, for instance from tests.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + 'static,
    {
        Self {
            payload: Box::new(value),
        }
    }

    pub(crate) fn from_payload(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { payload }
    }

    /// Returns the panic message, if the payload is a `&'static str` or a
    /// `String`.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            Some(s)
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Returns `true` if the payload is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Returns a reference to the payload if it is of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Gives back the raw payload.
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => f.write_str(message),
            None => f.write_str("<non-string panic payload>"),
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Fault: Send);
    static_assertions::assert_not_impl_any!(Fault: Sync, Clone);

    #[test]
    fn test_message_from_str_payload() {
        let fault = Fault::new("static message");
        assert_eq!(fault.message(), Some("static message"));
        assert!(fault.is::<&'static str>());
        assert_eq!(fault.to_string(), "static message");
    }

    #[test]
    fn test_message_from_string_payload() {
        let fault = Fault::new(String::from("owned message"));
        assert_eq!(fault.message(), Some("owned message"));
        assert_eq!(
            fault.downcast_ref::<String>().map(String::as_str),
            Some("owned message")
        );
    }

    #[test]
    fn test_non_string_payload() {
        let fault = Fault::new(123_u32);
        assert_eq!(fault.message(), None);
        assert_eq!(fault.downcast_ref::<u32>(), Some(&123));
        assert_eq!(fault.to_string(), "<non-string panic payload>");

        let payload = fault.into_payload();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&123));
    }

    #[test]
    fn test_from_caught_panic() {
        let payload = std::panic::catch_unwind::<_, ()>(|| panic!("caught {}", 7))
            .expect_err("closure should panic");
        let fault = Fault::from_payload(payload);
        assert_eq!(fault.message(), Some("caught 7"));
        assert_eq!(format!("{fault:?}"), r#"Fault { message: Some("caught 7"), .. }"#);
    }
}
