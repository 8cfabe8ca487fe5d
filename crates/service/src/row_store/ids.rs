use crate::errors::StoreError;

use super::schema::IdStrategy;

/// Resolved id format for one allocation: the prefix is fixed once the
/// payload is known, so parsing and rendering share it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdFormat {
    prefix: String,
    width: usize,
    floor: u64,
}

impl IdFormat {
    /// Counter scope for the backend. Numeric ids use the empty scope.
    pub fn scope(&self) -> &str { &self.prefix }

    /// Numeric part of an existing id, `None` when it belongs to another
    /// prefix or does not parse.
    pub fn parse(&self, raw: &str) -> Option<u64> {
        let raw = raw.trim();
        let digits = raw.strip_prefix(self.prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn max_seen<'a, I>(&self, ids: I) -> Option<u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter().filter_map(|id| self.parse(id)).max()
    }

    /// Candidate number from the table contents alone; the backend counter
    /// may still push it higher.
    pub fn next_after(&self, seen: Option<u64>) -> Result<u64, StoreError> {
        seen.unwrap_or(0).max(self.floor).checked_add(1).ok_or_else(StoreError::id_space_exhausted)
    }

    /// Highest number already taken in this scope, if above the floor.
    pub fn taken(&self, seen: Option<u64>) -> Option<u64> {
        seen.filter(|n| *n > self.floor)
    }

    pub fn render(&self, n: u64) -> String {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }
}

impl IdStrategy {
    /// Resolve the format for a create request. `lookup` returns the payload
    /// value of a column, used by prefix-by-column strategies.
    pub fn format_for<'a, F>(&self, lookup: F) -> Result<IdFormat, StoreError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        match self {
            IdStrategy::Numeric { start } => Ok(IdFormat { prefix: String::new(), width: 0, floor: *start }),
            IdStrategy::Prefixed { prefix, width } => Ok(IdFormat { prefix: prefix.clone(), width: *width, floor: 0 }),
            IdStrategy::PrefixByColumn { column, codes, fallback, width } => {
                let name = lookup(column.as_str()).map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err(StoreError::Validation(format!("{column} is required")));
                }
                Ok(IdFormat { prefix: prefix_for(codes, fallback, name).to_string(), width: *width, floor: 0 })
            }
        }
    }

    /// Every format this strategy can produce. Used to carry counters over a
    /// table reset.
    pub fn formats(&self) -> Vec<IdFormat> {
        match self {
            IdStrategy::Numeric { start } => vec![IdFormat { prefix: String::new(), width: 0, floor: *start }],
            IdStrategy::Prefixed { prefix, width } => vec![IdFormat { prefix: prefix.clone(), width: *width, floor: 0 }],
            IdStrategy::PrefixByColumn { codes, fallback, width, .. } => {
                let mut prefixes: Vec<&str> = codes.iter().map(|(_, c)| c.as_str()).collect();
                prefixes.push(fallback.as_str());
                prefixes.sort_unstable();
                prefixes.dedup();
                prefixes
                    .into_iter()
                    .map(|p| IdFormat { prefix: p.to_string(), width: *width, floor: 0 })
                    .collect()
            }
        }
    }
}

/// Look up the short code of a free-text name, falling back when unknown.
pub fn prefix_for<'a>(codes: &'a [(String, String)], fallback: &'a str, name: &str) -> &'a str {
    let name = name.trim();
    codes
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, code)| code.as_str())
        .unwrap_or(fallback)
}
