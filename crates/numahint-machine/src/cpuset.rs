//! Ordered CPU-id sets.
//!
//! `CpuSet` is the currency of the whole engine: allocation records, NUMA
//! pools, and reserved cores are all expressed as sets of logical CPU ids.
//! The same type doubles as a set of NUMA ids where the engine filters
//! candidate nodes. Iteration order is always ascending, and the text form
//! is the kernel cpulist syntax (`"0-3,8"`), which is also how the type
//! serializes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An ordered set of logical CPU (or NUMA) ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids in the set.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.0.contains(&id)
    }

    pub fn insert(&mut self, id: usize) {
        self.0.insert(id);
    }

    pub fn remove(&mut self, id: usize) {
        self.0.remove(&id);
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Ids as an ascending vector.
    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    pub fn union(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.difference(&other.0).copied().collect())
    }

    /// Whether every id in `self` is also in `other`.
    pub fn is_subset_of(&self, other: &CpuSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        CpuSet(iter.into_iter().collect())
    }
}

impl Extend<usize> for CpuSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// Kernel cpulist form: maximal runs collapse to `a-b`, singletons stay
/// bare, runs join with commas. The empty set renders as `""`.
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.0.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = ParseCpuSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = BTreeSet::new();
        let s = s.trim();
        if s.is_empty() {
            return Ok(CpuSet(set));
        }
        for part in s.split(',') {
            let part = part.trim();
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse().map_err(|_| bad(part))?;
                    let hi: usize = hi.trim().parse().map_err(|_| bad(part))?;
                    if lo > hi {
                        return Err(bad(part));
                    }
                    set.extend(lo..=hi);
                }
                None => {
                    set.insert(part.parse().map_err(|_| bad(part))?);
                }
            }
        }
        Ok(CpuSet(set))
    }
}

fn bad(part: &str) -> ParseCpuSetError {
    ParseCpuSetError {
        part: part.to_string(),
    }
}

/// Error parsing a cpulist string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cpulist element: {part:?}")]
pub struct ParseCpuSetError {
    part: String,
}

impl Serialize for CpuSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CpuSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[usize]) -> CpuSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn set_arithmetic() {
        let a = set(&[0, 1, 2, 3]);
        let b = set(&[2, 3, 4]);

        assert_eq!(a.union(&b), set(&[0, 1, 2, 3, 4]));
        assert_eq!(a.intersection(&b), set(&[2, 3]));
        assert_eq!(a.difference(&b), set(&[0, 1]));
        assert_eq!(a.size(), 4);
        assert!(a.contains(3));
        assert!(!a.contains(4));
    }

    #[test]
    fn iteration_is_ascending() {
        let s: CpuSet = [5, 1, 9, 3].into_iter().collect();
        assert_eq!(s.to_vec(), vec![1, 3, 5, 9]);
    }

    #[test]
    fn subset_check() {
        assert!(set(&[1, 2]).is_subset_of(&set(&[0, 1, 2, 3])));
        assert!(!set(&[1, 4]).is_subset_of(&set(&[0, 1, 2, 3])));
        assert!(CpuSet::new().is_subset_of(&set(&[0])));
    }

    #[test]
    fn display_collapses_runs() {
        assert_eq!(set(&[0, 1, 2, 3, 8]).to_string(), "0-3,8");
        assert_eq!(set(&[7]).to_string(), "7");
        assert_eq!(set(&[1, 3, 5]).to_string(), "1,3,5");
        assert_eq!(CpuSet::new().to_string(), "");
    }

    #[test]
    fn parse_cpulist() {
        let s: CpuSet = "0-3,8".parse().unwrap();
        assert_eq!(s, set(&[0, 1, 2, 3, 8]));

        let s: CpuSet = " 2 , 4-5 ".parse().unwrap();
        assert_eq!(s, set(&[2, 4, 5]));

        let s: CpuSet = "".parse().unwrap();
        assert!(s.is_empty());

        assert!("3-1".parse::<CpuSet>().is_err());
        assert!("a".parse::<CpuSet>().is_err());
    }

    #[test]
    fn serde_round_trip_as_cpulist() {
        let s = set(&[0, 1, 2, 16]);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"0-2,16\"");
        let back: CpuSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
