//! Sentry-based response framing.
//!
//! Modem responses carry no length prefix. A response ends when one of the
//! configured [`Sentry`] strings shows up in the receive buffer. A wildcard
//! sentry (`+CME ERROR:.*\r\n` in config syntax) additionally waits for its
//! delimiter so the variable tail is part of the response.

use std::fmt;

/// Delimiter that closes the variable tail of a wildcard sentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    CrLf,
    Cr,
    Lf,
}

impl Wildcard {
    pub fn as_str(self) -> &'static str {
        match self {
            Wildcard::CrLf => "\r\n",
            Wildcard::Cr => "\r",
            Wildcard::Lf => "\n",
        }
    }
}

/// A marker whose appearance in the receive buffer ends a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentry {
    pub literal: String,
    pub wildcard: Option<Wildcard>,
}

impl Sentry {
    /// A sentry that completes as soon as `literal` is seen.
    pub fn plain(literal: impl Into<String>) -> Self {
        Self {
            literal: literal.into(),
            wildcard: None,
        }
    }

    /// A sentry whose match extends past `literal` up to the next `delimiter`.
    pub fn wildcard(literal: impl Into<String>, delimiter: Wildcard) -> Self {
        Self {
            literal: literal.into(),
            wildcard: Some(delimiter),
        }
    }

    /// Build a sentry from its decoded config form.
    ///
    /// A trailing `.*\r\n`, `.*\r` or `.*\n` turns the text before `.*` into
    /// the literal of a wildcard sentry. Anything else is a plain sentry.
    ///
    /// ```
    /// use sercom::framer::{Sentry, Wildcard};
    ///
    /// let s = Sentry::from_pattern("\r\n+CME ERROR:.*\r\n");
    /// assert_eq!(s, Sentry::wildcard("\r\n+CME ERROR:", Wildcard::CrLf));
    /// assert_eq!(Sentry::from_pattern("\r\nOK\r\n"), Sentry::plain("\r\nOK\r\n"));
    /// ```
    pub fn from_pattern(pattern: &str) -> Self {
        for delimiter in [Wildcard::CrLf, Wildcard::Cr, Wildcard::Lf] {
            let marker = format!(".*{}", delimiter.as_str());
            if let Some(literal) = pattern.strip_suffix(marker.as_str()) {
                return Self::wildcard(literal, delimiter);
            }
        }
        Self::plain(pattern)
    }
}

impl fmt::Display for Sentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.literal)?;
        if let Some(delimiter) = self.wildcard {
            write!(f, " .. {:?}", delimiter.as_str())?;
        }
        Ok(())
    }
}

/// Outcome of inspecting the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Keep accumulating.
    Incomplete,
    /// `buf[..end]` is a full response, closed by `sentries[sentry]`.
    Complete { end: usize, sentry: usize },
}

/// Decides whether a buffer holds a complete response.
#[derive(Debug, Clone)]
pub struct ResponseFramer {
    sentries: Vec<Sentry>,
}

impl ResponseFramer {
    pub fn new(sentries: Vec<Sentry>) -> Self {
        Self { sentries }
    }

    pub fn sentries(&self) -> &[Sentry] {
        &self.sentries
    }

    /// Locate the earliest sentry in `buf`.
    ///
    /// Ties at the same offset go to the sentry configured first. If the
    /// winner is a wildcard sentry whose delimiter has not arrived yet the
    /// buffer is still [`Frame::Incomplete`], even when a later sentry is
    /// already present.
    pub fn frame(&self, buf: &[u8]) -> Frame {
        let mut best: Option<(usize, usize)> = None;
        for (idx, sentry) in self.sentries.iter().enumerate() {
            if sentry.literal.is_empty() {
                continue;
            }
            if let Some(pos) = find(buf, sentry.literal.as_bytes()) {
                if best.is_none_or(|(best_pos, _)| pos < best_pos) {
                    best = Some((pos, idx));
                }
            }
        }

        let Some((pos, idx)) = best else {
            return Frame::Incomplete;
        };
        let sentry = &self.sentries[idx];
        let literal_end = pos + sentry.literal.len();
        match sentry.wildcard {
            None => Frame::Complete {
                end: literal_end,
                sentry: idx,
            },
            Some(delimiter) => {
                let delimiter = delimiter.as_str().as_bytes();
                match find(&buf[literal_end..], delimiter) {
                    Some(offset) => Frame::Complete {
                        end: literal_end + offset + delimiter.len(),
                        sentry: idx,
                    },
                    None => Frame::Incomplete,
                }
            }
        }
    }
}

/// Byte-wise substring search.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
