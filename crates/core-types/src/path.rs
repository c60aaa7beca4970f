//! Structural addresses of steps inside a flow tree.
//!
//! A path alternates index and branch tokens: `[3]` is top-level step 3,
//! `[3, "then", 0]` the first step of its then-branch. Paths are only stable
//! within one run and are used as keys for status and countdown maps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchName {
    Then,
    Else,
}

impl BranchName {
    pub fn as_str(self) -> &'static str {
        match self {
            BranchName::Then => "then",
            BranchName::Else => "else",
        }
    }

    pub fn from_condition(result: bool) -> Self {
        if result {
            BranchName::Then
        } else {
            BranchName::Else
        }
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathToken {
    Index(usize),
    Branch(BranchName),
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Vec<PathToken>", into = "Vec<PathToken>")]
pub struct ExecutionPath {
    tokens: Vec<PathToken>,
}

impl ExecutionPath {
    /// Prefix of the top-level step list.
    pub fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn top(index: usize) -> Self {
        Self {
            tokens: vec![PathToken::Index(index)],
        }
    }

    pub fn from_tokens(tokens: Vec<PathToken>) -> Result<Self, CoreError> {
        for (pos, token) in tokens.iter().enumerate() {
            let expect_index = pos % 2 == 0;
            match (expect_index, token) {
                (true, PathToken::Index(_)) | (false, PathToken::Branch(_)) => {}
                _ => {
                    return Err(CoreError::InvalidPath(format!(
                        "token {pos} breaks index/branch alternation"
                    )))
                }
            }
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Address of step `index` in the list this path points at.
    pub fn with_index(&self, index: usize) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(PathToken::Index(index));
        Self { tokens }
    }

    /// Prefix of one branch list of the `If` step addressed by `self`.
    pub fn with_branch(&self, branch: BranchName) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(PathToken::Branch(branch));
        Self { tokens }
    }

    pub fn child(&self, branch: BranchName, index: usize) -> Self {
        self.with_branch(branch).with_index(index)
    }

    pub fn top_index(&self) -> Option<usize> {
        match self.tokens.first() {
            Some(PathToken::Index(index)) => Some(*index),
            _ => None,
        }
    }

    pub fn last_index(&self) -> Option<usize> {
        match self.tokens.last() {
            Some(PathToken::Index(index)) => Some(*index),
            _ => None,
        }
    }

    /// Number of step levels, 1 for a top-level step.
    pub fn depth(&self) -> usize {
        self.tokens
            .iter()
            .filter(|token| matches!(token, PathToken::Index(_)))
            .count()
    }

    pub fn is_top_level(&self) -> bool {
        self.tokens.len() == 1 && self.last_index().is_some()
    }

    /// The enclosing `If` step, if this step sits inside a branch.
    pub fn parent(&self) -> Option<Self> {
        if self.tokens.len() < 3 {
            return None;
        }
        Some(Self {
            tokens: self.tokens[..self.tokens.len() - 2].to_vec(),
        })
    }

    /// True when `other` equals this path or lies inside its subtree.
    pub fn contains(&self, other: &ExecutionPath) -> bool {
        other.tokens.len() >= self.tokens.len() && other.tokens[..self.tokens.len()] == self.tokens[..]
    }

    /// True when this path lies strictly inside `ancestor`'s subtree.
    pub fn is_within(&self, ancestor: &ExecutionPath) -> bool {
        self.tokens.len() > ancestor.tokens.len() && ancestor.contains(self)
    }

    /// Dotted map key, e.g. `2.then.0`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, token) in self.tokens.iter().enumerate() {
            if pos > 0 {
                f.write_str(".")?;
            }
            match token {
                PathToken::Index(index) => write!(f, "{index}")?,
                PathToken::Branch(branch) => f.write_str(branch.as_str())?,
            }
        }
        Ok(())
    }
}

impl FromStr for ExecutionPath {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let tokens = trimmed
            .split('.')
            .map(|part| match part {
                "then" => Ok(PathToken::Branch(BranchName::Then)),
                "else" => Ok(PathToken::Branch(BranchName::Else)),
                other => other
                    .parse::<usize>()
                    .map(PathToken::Index)
                    .map_err(|_| CoreError::InvalidPath(format!("unknown token '{other}'"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_tokens(tokens)
    }
}

impl TryFrom<Vec<PathToken>> for ExecutionPath {
    type Error = CoreError;

    fn try_from(tokens: Vec<PathToken>) -> Result<Self, Self::Error> {
        Self::from_tokens(tokens)
    }
}

impl From<ExecutionPath> for Vec<PathToken> {
    fn from(path: ExecutionPath) -> Self {
        path.tokens
    }
}
