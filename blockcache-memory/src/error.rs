// Copyright 2026 blockcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Display;

use crate::backend::AllocError;

/// In-memory cache error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The memory backend cannot provide storage for a new entry.
    #[error("failed to allocate {len} bytes for cache entry: {source}")]
    AllocationFailed {
        /// Requested value length.
        len: usize,
        /// Reason reported by the backend.
        source: AllocError,
    },
    /// The charge of a new entry exceeds what the cache can account for.
    #[error("charge {charge} exceeds limit {limit}")]
    ChargeTooLarge {
        /// Requested charge.
        charge: usize,
        /// Largest accepted charge.
        limit: usize,
    },
    /// Config error.
    #[error("config error: {0}")]
    ConfigError(String),
    /// I/O error raised while preparing the persistent memory pool.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Multiple error list.
    #[error(transparent)]
    Multiple(MultipleError),
}

impl Error {
    /// Combine multiple errors into one error.
    ///
    /// A single error is returned as is.
    pub fn multiple(mut errs: Vec<Error>) -> Self {
        if errs.len() == 1 {
            return errs.remove(0);
        }
        Self::Multiple(MultipleError(errs))
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// A list of errors reported together.
#[derive(thiserror::Error, Debug)]
pub struct MultipleError(Vec<Error>);

impl MultipleError {
    /// The errors in report order.
    pub fn errors(&self) -> &[Error] {
        &self.0
    }
}

impl Display for MultipleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "multiple errors: [")?;
        if let Some((last, errs)) = self.0.as_slice().split_last() {
            for err in errs {
                write!(f, "{}, ", err)?;
            }
            write!(f, "{}", last)?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

/// In-memory cache result.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_error_display() {
        let err = Error::multiple(vec![Error::config("a"), Error::config("b")]);
        assert_eq!(err.to_string(), "multiple errors: [config error: a, config error: b]");

        let err = Error::multiple(vec![Error::config("only")]);
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
