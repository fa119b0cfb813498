//! Level-of-detail filter.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::Error;

/// Highest level of detail.
pub const MAX_LOD: u8 = 4;

const LEVELS: usize = MAX_LOD as usize + 1;

/// Set of enabled levels of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LodFilter {
    enabled: [bool; LEVELS],
}

impl Default for LodFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl LodFilter {
    /// Every level enabled.
    pub fn all() -> Self {
        Self {
            enabled: [true; LEVELS],
        }
    }

    /// No level enabled.
    pub fn none() -> Self {
        Self {
            enabled: [false; LEVELS],
        }
    }

    /// Exactly the given levels. Levels above [`MAX_LOD`] are ignored.
    pub fn only(levels: &[u8]) -> Self {
        levels.iter().fold(Self::none(), |f, &l| f.enable(l))
    }

    pub fn enable(mut self, lod: u8) -> Self {
        if let Some(slot) = self.enabled.get_mut(lod as usize) {
            *slot = true;
        }
        self
    }

    pub fn disable(mut self, lod: u8) -> Self {
        if let Some(slot) = self.enabled.get_mut(lod as usize) {
            *slot = false;
        }
        self
    }

    pub fn is_enabled(&self, lod: u8) -> bool {
        self.enabled.get(lod as usize).copied().unwrap_or(false)
    }

    /// Whether at least one enabled level is `>= lod`.
    pub fn contains_lod_greater_than_or_equal(&self, lod: u8) -> bool {
        (lod..=MAX_LOD).any(|l| self.is_enabled(l))
    }

    /// Enabled levels within `range`, ascending.
    pub fn levels_in(&self, range: RangeInclusive<u8>) -> LodIter {
        let start = *range.start();
        let end = (*range.end()).min(MAX_LOD);
        LodIter {
            filter: *self,
            start,
            end,
            next: start,
        }
    }

    /// All enabled levels, ascending.
    pub fn levels(&self) -> LodIter {
        self.levels_in(0..=MAX_LOD)
    }

    pub fn is_empty(&self) -> bool {
        !self.enabled.iter().any(|e| *e)
    }
}

impl FromStr for LodFilter {
    type Err = Error;

    /// Parses `all` or a comma separated list such as `0,2,3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let mut filter = Self::none();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let lod: u8 = part
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("invalid level of detail '{part}'")))?;
            if lod > MAX_LOD {
                return Err(Error::InvalidConfig(format!(
                    "level of detail {lod} out of range 0..={MAX_LOD}"
                )));
            }
            filter = filter.enable(lod);
        }
        if filter.is_empty() {
            return Err(Error::InvalidConfig("no level of detail selected".to_string()));
        }
        Ok(filter)
    }
}

impl fmt::Display for LodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<String> = self.levels().map(|l| l.to_string()).collect();
        write!(f, "{}", levels.join(","))
    }
}

/// Restartable iterator over the enabled levels of a range.
#[derive(Debug, Clone)]
pub struct LodIter {
    filter: LodFilter,
    start: u8,
    end: u8,
    next: u8,
}

impl LodIter {
    /// Start over from the beginning of the range.
    pub fn reset(&mut self) {
        self.next = self.start;
    }
}

impl Iterator for LodIter {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        while self.next <= self.end {
            let lod = self.next;
            self.next += 1;
            if self.filter.is_enabled(lod) {
                return Some(lod);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_disable() {
        let filter = LodFilter::all().disable(2);
        assert!(filter.is_enabled(1));
        assert!(!filter.is_enabled(2));
        assert!(!filter.is_enabled(9));
        assert!(filter.enable(2).is_enabled(2));
    }

    #[test]
    fn test_greater_or_equal() {
        let filter = LodFilter::only(&[1, 2]);
        assert!(filter.contains_lod_greater_than_or_equal(2));
        assert!(!filter.contains_lod_greater_than_or_equal(3));
        assert!(LodFilter::only(&[4]).contains_lod_greater_than_or_equal(0));
    }

    #[test]
    fn test_restartable_iteration() {
        let filter = LodFilter::only(&[0, 2, 3]);
        let mut iter = filter.levels_in(1..=3);
        assert_eq!(iter.by_ref().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(iter.next(), None);
        iter.reset();
        assert_eq!(iter.collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_parse() {
        let filter: LodFilter = "0, 2,3".parse().unwrap();
        assert_eq!(filter, LodFilter::only(&[0, 2, 3]));
        assert_eq!(filter.to_string(), "0,2,3");
        assert_eq!("all".parse::<LodFilter>().unwrap(), LodFilter::all());
        assert!("5".parse::<LodFilter>().is_err());
        assert!("x".parse::<LodFilter>().is_err());
        assert!("".parse::<LodFilter>().is_err());
    }
}
