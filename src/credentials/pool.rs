// Credential pool
// Ordered set of API keys with a rotation cursor and a per-request cycle marker

use rand::Rng;
use std::fmt;
use std::sync::Arc;

const PLACEHOLDER_PREFIX: &str = "PASTE_YOUR_API_KEY";

/// An opaque access token. Never printed in full.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building requests only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, enough to tell keys apart in logs
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("…{}", tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.hint())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}

#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    cursor: usize,
    cycle_start: usize,
}

impl CredentialPool {
    /// Build a pool from raw tokens, dropping empty and placeholder entries.
    /// The starting cursor is random so restarts spread load across keys.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials = Self::filter(tokens);
        let cursor = if credentials.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..credentials.len())
        };
        Self {
            credentials,
            cursor,
            cycle_start: cursor,
        }
    }

    /// Build a pool with a fixed starting cursor (wrapped into range)
    pub fn starting_at<I, S>(tokens: I, cursor: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials = Self::filter(tokens);
        let cursor = if credentials.is_empty() {
            0
        } else {
            cursor % credentials.len()
        };
        Self {
            credentials,
            cursor,
            cycle_start: cursor,
        }
    }

    fn filter<I, S>(tokens: I) -> Vec<Credential>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .filter_map(|t| {
                let token = t.as_ref().trim();
                (!token.is_empty() && !token.starts_with(PLACEHOLDER_PREFIX))
                    .then(|| Credential::new(token))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Credential at the cursor, or None for an empty pool
    pub fn current_credential(&self) -> Option<Credential> {
        self.credentials.get(self.cursor).cloned()
    }

    /// Mark the cursor as the start of a new logical request.
    /// Called once per logical call, never per retry.
    pub fn begin_cycle(&mut self) {
        self.cycle_start = self.cursor;
    }

    /// Advance to the next credential.
    /// Returns false once every credential has been tried in this cycle,
    /// and always for pools of one or zero.
    pub fn rotate(&mut self) -> bool {
        if self.credentials.len() <= 1 {
            return false;
        }

        self.cursor = (self.cursor + 1) % self.credentials.len();

        self.cursor != self.cycle_start
    }
}
