use std::error::Error;
use std::fmt;

/// A wrapper around an [`Error`] that prints its causes.
///
/// # Example
///
/// ```
/// use fanout_log::LogError;
///
/// if let Err(error) = std::env::var("FOO") {
///     fanout_log::error!(error = %LogError(&error), "env failed");
/// }
/// ```
pub struct LogError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for LogError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug)]
    struct Outer(io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("could not start")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_log_error_prints_causes() {
        let error = Outer(io::Error::new(io::ErrorKind::Other, "out of threads"));
        assert_eq!(
            LogError(&error).to_string(),
            "could not start\n  caused by: out of threads"
        );
    }

    #[test]
    fn test_log_error_without_source() {
        let error = io::Error::new(io::ErrorKind::Other, "oh no!");
        assert_eq!(LogError(&error).to_string(), "oh no!");
    }
}
