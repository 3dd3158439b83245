//! Sorted IP range table
//!
//! Non-overlapping `[start, end]` segments kept ascending by `start`.
//! Built once at startup from one or more 4-column tables and read-only
//! afterwards.

use std::io::BufRead;
use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// One inclusive address range annotated with a country/region code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpSegment {
    pub start: u64,
    pub end: u64,
    pub short_name: String,
    pub name: String,
}

impl IpSegment {
    /// Sentinel for addresses no segment brackets (private, reserved,
    /// unmapped).
    pub fn unknown(key: u64) -> Self {
        Self {
            start: key,
            end: key,
            short_name: "-".to_string(),
            name: "-".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.short_name == "-"
    }
}

/// Sorted segment list with one shared probe routine for lookup and
/// ordered insertion, so the two can never disagree on tie-breaks.
#[derive(Debug, Clone, Default)]
pub struct IpList {
    segments: Vec<IpSegment>,
}

impl IpList {
    pub fn new() -> Self {
        Self {
            segments: Vec::with_capacity(1024),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Binary probe narrowing `[lo, hi)`: a segment matches when
    /// `start <= key <= end`; otherwise the window narrows left when
    /// `start > key` and right when `end < key`. Returns the match
    /// index, or the collapse point, which doubles as the insertion
    /// index for a segment starting at `key`.
    fn locate(&self, key: u64) -> usize {
        let (mut lo, mut hi) = (0, self.segments.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let seg = &self.segments[mid];
            if seg.start > key {
                hi = mid;
            } else if seg.end < key {
                lo = mid + 1;
            } else {
                return mid;
            }
        }
        lo
    }

    /// The segment bracketing `key`, or the `"-"` sentinel.
    pub fn find(&self, key: u64) -> IpSegment {
        let index = self.locate(key);
        match self.segments.get(index) {
            Some(seg) if seg.start <= key && key <= seg.end => seg.clone(),
            _ => IpSegment::unknown(key),
        }
    }

    /// Ordered insert keyed by `start`, using the same probe as `find`.
    pub fn insert(&mut self, seg: IpSegment) {
        let index = self.locate(seg.start);
        self.segments.insert(index, seg);
    }

    /// Ingest a line-oriented 4-field table (`start,end,short,name`).
    /// Rows with a wrong field count or malformed integers are skipped;
    /// only failing to read the file at all is an error.
    pub fn load_table(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::open(path.as_ref())?;
        let reader = std::io::BufReader::new(file);

        let mut loaded = 0usize;
        for line in reader.lines() {
            let line = line?;
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 4 {
                continue;
            }
            let start = match fields[0].trim().parse::<u64>() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let end = match fields[1].trim().parse::<u64>() {
                Ok(n) => n,
                Err(_) => continue,
            };
            self.insert(IpSegment {
                start,
                end,
                short_name: fields[2].trim().to_string(),
                name: fields[3].trim().to_string(),
            });
            loaded += 1;
        }

        debug!(
            path = %path.as_ref().display(),
            loaded,
            total = self.segments.len(),
            "loaded ip range table"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seg(start: u64, end: u64, short: &str) -> IpSegment {
        IpSegment {
            start,
            end,
            short_name: short.to_string(),
            name: short.to_string(),
        }
    }

    #[test]
    fn find_hits_inside_segments() {
        let mut list = IpList::new();
        list.insert(seg(10, 20, "AA"));
        list.insert(seg(30, 40, "BB"));
        list.insert(seg(50, 60, "CC"));

        for key in [10, 15, 20] {
            assert_eq!(list.find(key).short_name, "AA");
        }
        for key in [30, 35, 40] {
            assert_eq!(list.find(key).short_name, "BB");
        }
        for key in [50, 55, 60] {
            assert_eq!(list.find(key).short_name, "CC");
        }
    }

    #[test]
    fn find_misses_return_sentinel() {
        let mut list = IpList::new();
        list.insert(seg(10, 20, "AA"));
        list.insert(seg(30, 40, "BB"));

        for key in [0, 9, 21, 29, 41, u64::MAX] {
            let hit = list.find(key);
            assert!(hit.is_unknown(), "key {} hit {:?}", key, hit);
            assert_eq!(hit.start, key);
            assert_eq!(hit.end, key);
        }
    }

    #[test]
    fn find_on_empty_list_is_sentinel() {
        let list = IpList::new();
        assert!(list.find(42).is_unknown());
    }

    #[test]
    fn insertion_order_does_not_affect_lookups() {
        let segments = [
            seg(50, 60, "CC"),
            seg(10, 20, "AA"),
            seg(70, 80, "DD"),
            seg(30, 40, "BB"),
            seg(90, 99, "EE"),
        ];

        let mut shuffled = IpList::new();
        for s in &segments {
            shuffled.insert(s.clone());
        }

        let mut sorted = IpList::new();
        let mut ordered = segments.to_vec();
        ordered.sort_by_key(|s| s.start);
        for s in ordered {
            sorted.insert(s);
        }

        for key in 0..110 {
            assert_eq!(shuffled.find(key), sorted.find(key), "key {}", key);
        }
    }

    #[test]
    fn load_table_skips_malformed_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "16777216,16777471,AU,Australia").unwrap();
        writeln!(file, "not-a-number,1,XX,Broken").unwrap();
        writeln!(file, "1,2,3").unwrap();
        writeln!(file, "16778240,16779263,CN,China").unwrap();
        writeln!(file, "5,six,XX,Broken").unwrap();
        file.flush().unwrap();

        let mut list = IpList::new();
        list.load_table(file.path()).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.find(16777300).short_name, "AU");
        assert_eq!(list.find(16778300).short_name, "CN");
    }

    #[test]
    fn load_table_missing_file_is_an_error() {
        let mut list = IpList::new();
        assert!(list.load_table("/nonexistent/ranges.csv").is_err());
    }
}
