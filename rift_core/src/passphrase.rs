//! Passphrase generation from a diceware-style wordlist.
//!
//! Each word is picked by five die rolls forming a roll code such as `35126`,
//! which indexes the wordlist. A complete list holds 6^5 = 7776 entries.

use crate::error::{Result, RiftError};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Digits per roll code
pub const ROLLS_PER_WORD: usize = 5;

/// Number of entries in a complete wordlist (6^5)
pub const WORDLIST_SIZE: usize = 7776;

/// Separator used when rendering a passphrase
pub const WORD_SEPARATOR: char = '-';

/// Largest multiple of 6 representable in a byte; draws at or above it are redrawn
const REJECTION_LIMIT: u8 = 252;

/// Read-only mapping from roll code to word.
#[derive(Debug, Clone, Default)]
pub struct Wordlist {
    words: HashMap<String, String>,
}

impl Wordlist {
    /// Parse `code<TAB>word` lines, skipping anything malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut words = HashMap::new();
        let mut skipped = 0usize;

        for line in raw.lines() {
            let Some((code, word)) = line.split_once('\t') else {
                skipped += 1;
                continue;
            };
            let code = code.trim();
            let word = word.trim();
            if !is_roll_code(code) || word.is_empty() {
                skipped += 1;
                continue;
            }
            words.insert(code.to_string(), word.to_string());
        }

        if words.is_empty() {
            return Err(RiftError::ResourceLoad(
                "wordlist contains no valid entries".to_string(),
            ));
        }
        if skipped > 0 {
            tracing::debug!(skipped, entries = words.len(), "skipped malformed wordlist lines");
        }

        Ok(Self { words })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RiftError::ResourceLoad(format!("{}: {}", path.display(), e)))?;
        let wordlist = Self::parse(&raw)?;
        tracing::info!(path = %path.display(), entries = wordlist.len(), "wordlist loaded");
        Ok(wordlist)
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.words.get(code).map(String::as_str)
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.words.values().any(|w| w == word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// True when every roll code 11111..=66666 has an entry
    pub fn is_complete(&self) -> bool {
        self.words.len() == WORDLIST_SIZE
    }
}

fn is_roll_code(code: &str) -> bool {
    code.len() == ROLLS_PER_WORD && code.bytes().all(|b| (b'1'..=b'6').contains(&b))
}

/// An ordered sequence of words exchanged out-of-band between the peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Passphrase {
    words: Vec<String>,
}

impl Passphrase {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", WORD_SEPARATOR)?;
            }
            f.write_str(word)?;
        }
        Ok(())
    }
}

impl FromStr for Passphrase {
    type Err = RiftError;

    /// Accepts what a user might type: any case, spaces or dashes between words.
    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<String> = s
            .split(|c: char| c == WORD_SEPARATOR || c.is_whitespace())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        if words.is_empty() {
            return Err(RiftError::Config("passphrase is empty".to_string()));
        }
        Ok(Self { words })
    }
}

/// Roll one fair six-sided die from the thread-local CSPRNG.
pub fn roll_die() -> u8 {
    let mut rng = rand::rng();
    loop {
        let byte: u8 = rng.random();
        if byte < REJECTION_LIMIT {
            return byte % 6 + 1;
        }
    }
}

/// Five rolls, the j-th weighted by 10^j, giving a code in 11111..=66666.
pub fn roll_code() -> String {
    let mut code: u32 = 0;
    for j in 0..ROLLS_PER_WORD as u32 {
        code += roll_die() as u32 * 10u32.pow(j);
    }
    code.to_string()
}

pub fn generate_passphrase(length: usize, wordlist: &Wordlist) -> Result<Passphrase> {
    let mut words = Vec::with_capacity(length);
    for _ in 0..length {
        let code = roll_code();
        let word = wordlist
            .get(&code)
            .ok_or_else(|| RiftError::CodeGeneration(code.clone()))?;
        words.push(word.to_string());
    }
    Ok(Passphrase::new(words))
}

/// Shares one loaded wordlist across any number of sessions.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    wordlist: Arc<Wordlist>,
}

impl CodeGenerator {
    pub fn new(wordlist: Arc<Wordlist>) -> Self {
        if !wordlist.is_complete() {
            tracing::warn!(
                entries = wordlist.len(),
                expected = WORDLIST_SIZE,
                "wordlist is incomplete, generation may fail"
            );
        }
        Self { wordlist }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(Wordlist::load(path).await?)))
    }

    pub fn wordlist(&self) -> &Wordlist {
        &self.wordlist
    }

    pub fn generate(&self, length: usize) -> Result<Passphrase> {
        generate_passphrase(length, &self.wordlist)
    }
}
