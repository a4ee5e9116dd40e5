//! Per-file upload policy: which ACL, content headers and user metadata a
//! local file should carry once it is in the bucket.
//!
//! Pattern tables (ACL, cache-control, metadata) are evaluated in a fixed
//! order, most specific pattern first:
//! 1. more literal (non-wildcard) characters
//! 2. longer pattern
//! 3. lexicographically smaller pattern
//!
//! Content-type and content-encoding tables are keyed by file extension.

use crate::errors::{SyncError, SyncResult};
use std::{cmp::Reverse, collections::HashMap, fmt, str::FromStr};

/// Named preset access policy understood by the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::AwsExecRead => "aws-exec-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }

    /// The ACL as it reads back from an object's grant list.
    ///
    /// Presets that only grant the owner, the bucket owner or EC2 show no
    /// group grant and are indistinguishable from `private`.
    pub fn as_observed(&self) -> CannedAcl {
        match self {
            Self::PublicRead | Self::PublicReadWrite | Self::AuthenticatedRead => *self,
            _ => Self::Private,
        }
    }
}

impl FromStr for CannedAcl {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "private" => Self::Private,
            "public-read" => Self::PublicRead,
            "public-read-write" => Self::PublicReadWrite,
            "authenticated-read" => Self::AuthenticatedRead,
            "aws-exec-read" => Self::AwsExecRead,
            "bucket-owner-read" => Self::BucketOwnerRead,
            "bucket-owner-full-control" => Self::BucketOwnerFullControl,
            other => return Err(SyncError::InvalidAcl(other.to_string())),
        })
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes a file should be stored with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPolicy {
    pub acl: CannedAcl,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Raw pattern tables as they come out of configuration.
#[derive(Debug, Clone, Default)]
pub struct PolicyRules {
    pub acl: HashMap<String, String>,
    pub content_type: HashMap<String, String>,
    pub content_encoding: HashMap<String, String>,
    pub cache_control: HashMap<String, String>,
    pub metadata: HashMap<String, HashMap<String, String>>,
}

/// Compiled, deterministically ordered form of [`PolicyRules`].
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    acl: Vec<(GlobPattern, CannedAcl)>,
    cache_control: Vec<(GlobPattern, String)>,
    metadata: Vec<(GlobPattern, HashMap<String, String>)>,
    content_type: HashMap<String, String>,
    content_encoding: HashMap<String, String>,
}

impl PolicyResolver {
    /// Compile the rule tables. Fails on unknown canned ACL names.
    pub fn new(rules: PolicyRules) -> SyncResult<Self> {
        let mut acl = rules
            .acl
            .into_iter()
            .map(|(pattern, name)| Ok((GlobPattern::new(pattern), name.parse::<CannedAcl>()?)))
            .collect::<SyncResult<Vec<_>>>()?;
        let mut cache_control = compile(rules.cache_control);
        let mut metadata = compile(rules.metadata);
        acl.sort_by(|a, b| a.0.cmp_specificity(&b.0));
        cache_control.sort_by(|a, b| a.0.cmp_specificity(&b.0));
        metadata.sort_by(|a, b| a.0.cmp_specificity(&b.0));

        Ok(Self {
            acl,
            cache_control,
            metadata,
            content_type: by_extension(rules.content_type),
            content_encoding: by_extension(rules.content_encoding),
        })
    }

    /// Resolve the policy for a path relative to the source root (`/`-separated).
    pub fn resolve(&self, relative: &str) -> UploadPolicy {
        let ext = extension(relative);

        let content_type = ext.and_then(|ext| {
            self.content_type.get(ext).cloned().or_else(|| {
                mime_guess::from_ext(ext)
                    .first_raw()
                    .map(str::to_string)
            })
        });
        let content_encoding = ext.and_then(|ext| self.content_encoding.get(ext).cloned());

        UploadPolicy {
            acl: first_match(&self.acl, relative).copied().unwrap_or_default(),
            content_type,
            content_encoding,
            cache_control: first_match(&self.cache_control, relative).cloned(),
            metadata: first_match(&self.metadata, relative)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

fn compile<V>(table: HashMap<String, V>) -> Vec<(GlobPattern, V)> {
    table
        .into_iter()
        .map(|(pattern, value)| (GlobPattern::new(pattern), value))
        .collect()
}

fn by_extension(table: HashMap<String, String>) -> HashMap<String, String> {
    table
        .into_iter()
        .map(|(ext, value)| (ext.trim_start_matches('.').to_string(), value))
        .collect()
}

fn first_match<'a, V>(table: &'a [(GlobPattern, V)], relative: &str) -> Option<&'a V> {
    table
        .iter()
        .find(|(pattern, _)| pattern.matches_path(relative))
        .map(|(_, value)| value)
}

/// Extension of the last path element, without the dot.
fn extension(relative: &str) -> Option<&str> {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// Shell-style glob.
///
/// `*` and `?` stop at `/`, `**` crosses directories, `[a-z]` / `[!x]`
/// are character classes and `\` escapes the next character. Patterns
/// without a `/` are matched against the file name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    raw: String,
    len: usize,
    has_slash: bool,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    /// `?`
    One,
    /// `*`
    Star,
    /// `**` not followed by `/`
    AnyPath,
    /// `**/`: zero or more whole directories
    AnyDirs,
    Class(CharClass),
}

impl GlobPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let chars: Vec<char> = raw.trim_start_matches('/').chars().collect();
        Self {
            len: chars.len(),
            has_slash: chars.contains(&'/'),
            tokens: tokenize(&chars),
            raw,
        }
    }

    pub fn matches_path(&self, relative: &str) -> bool {
        let subject = if self.has_slash {
            relative
        } else {
            relative.rsplit('/').next().unwrap_or(relative)
        };
        let text: Vec<char> = subject.chars().collect();
        Matcher::new(&self.tokens, &text).matches(0, 0)
    }

    /// Characters that must appear verbatim; a class counts as a wildcard.
    fn literal_len(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, Token::Literal(_)))
            .count()
    }

    fn cmp_specificity(&self, other: &Self) -> std::cmp::Ordering {
        (Reverse(self.literal_len()), Reverse(self.len), &self.raw).cmp(&(
            Reverse(other.literal_len()),
            Reverse(other.len),
            &other.raw,
        ))
    }
}

fn tokenize(pat: &[char]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pat.len());
    let mut i = 0;
    while i < pat.len() {
        match pat[i] {
            '*' if pat.get(i + 1) == Some(&'*') => {
                if pat.get(i + 2) == Some(&'/') {
                    tokens.push(Token::AnyDirs);
                    i += 3;
                } else {
                    tokens.push(Token::AnyPath);
                    i += 2;
                }
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '?' => {
                tokens.push(Token::One);
                i += 1;
            }
            '[' => match parse_class(&pat[i + 1..]) {
                Some((class, after)) => {
                    tokens.push(Token::Class(class));
                    i = pat.len() - after.len();
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            '\\' => match pat.get(i + 1) {
                Some(&escaped) => {
                    tokens.push(Token::Literal(escaped));
                    i += 2;
                }
                None => {
                    tokens.push(Token::Literal('\\'));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Memoized over (token, text offset), so each pair is resolved once.
struct Matcher<'a> {
    tokens: &'a [Token],
    text: &'a [char],
    memo: Vec<Option<bool>>,
}

impl<'a> Matcher<'a> {
    fn new(tokens: &'a [Token], text: &'a [char]) -> Self {
        Self {
            tokens,
            text,
            memo: vec![None; (tokens.len() + 1) * (text.len() + 1)],
        }
    }

    fn matches(&mut self, t: usize, j: usize) -> bool {
        let slot = t * (self.text.len() + 1) + j;
        if let Some(hit) = self.memo[slot] {
            return hit;
        }
        let hit = self.step(t, j);
        self.memo[slot] = Some(hit);
        hit
    }

    fn step(&mut self, t: usize, j: usize) -> bool {
        let (tokens, text) = (self.tokens, self.text);
        let Some(token) = tokens.get(t) else {
            return j == text.len();
        };

        match token {
            Token::Literal(expected) => text.get(j) == Some(expected) && self.matches(t + 1, j + 1),
            Token::One => text.get(j).is_some_and(|&c| c != '/') && self.matches(t + 1, j + 1),
            Token::Class(class) => {
                text.get(j).is_some_and(|&c| c != '/' && class.matches(c))
                    && self.matches(t + 1, j + 1)
            }
            Token::Star => {
                for k in j..=text.len() {
                    if self.matches(t + 1, k) {
                        return true;
                    }
                    if text.get(k) == Some(&'/') {
                        break;
                    }
                }
                false
            }
            Token::AnyPath => (j..=text.len()).any(|k| self.matches(t + 1, k)),
            Token::AnyDirs => {
                self.matches(t + 1, j)
                    || (j..text.len()).any(|k| text[k] == '/' && self.matches(t + 1, k + 1))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CharClass {
    negated: bool,
    ranges: Vec<(char, char)>,
}

impl CharClass {
    fn matches(&self, c: char) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != self.negated
    }
}

/// Parse the body of `[...]`; `pat` starts right after the `[`.
fn parse_class(pat: &[char]) -> Option<(CharClass, &[char])> {
    let mut i = 0;
    let negated = matches!(pat.first(), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;
    while i < pat.len() {
        let c = pat[i];
        if c == ']' && !first {
            return Some((CharClass { negated, ranges }, &pat[i + 1..]));
        }
        first = false;
        if pat.get(i + 1) == Some(&'-') && pat.get(i + 2).is_some_and(|&hi| hi != ']') {
            ranges.push((c, pat[i + 2]));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}
