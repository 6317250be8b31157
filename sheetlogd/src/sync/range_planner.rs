use std::fmt;

/// Column holding the file names. Rows carry exactly one value, so every
/// planned range spans this single column.
pub const VALUE_COLUMN: &str = "A";

/// A sheet-qualified A1 range covering whole rows of [`VALUE_COLUMN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub sheet_name: String,
    pub start_row: u64,
    /// `None` means open-ended (to the bottom of the sheet).
    pub end_row: Option<u64>,
}

impl RangeDescriptor {
    pub fn single_row(sheet_name: impl Into<String>, row: u64) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            start_row: row,
            end_row: Some(row),
        }
    }

    /// `<sheet>!A1:A`, the whole value column.
    pub fn whole_column(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            start_row: 1,
            end_row: None,
        }
    }

    pub fn to_a1(&self) -> String {
        let sheet = quote_sheet_name(&self.sheet_name);
        match self.end_row {
            Some(end) => format!(
                "{sheet}!{VALUE_COLUMN}{}:{VALUE_COLUMN}{end}",
                self.start_row
            ),
            None => format!("{sheet}!{VALUE_COLUMN}{}:{VALUE_COLUMN}", self.start_row),
        }
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Computes where the next row lands.
///
/// The plan is derived from a fresh row count on every append; the ledger
/// may be edited by others between reads, so plans are never reused.
#[derive(Debug, Clone)]
pub struct RangePlanner {
    sheet_name: String,
}

impl RangePlanner {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
        }
    }

    pub fn read_range(&self) -> RangeDescriptor {
        RangeDescriptor::whole_column(self.sheet_name.clone())
    }

    pub fn plan(&self, current_row_count: usize) -> RangeDescriptor {
        let next_row = u64::try_from(current_row_count)
            .unwrap_or(u64::MAX - 1)
            .saturating_add(1);
        RangeDescriptor::single_row(self.sheet_name.clone(), next_row)
    }
}

fn quote_sheet_name(name: &str) -> String {
    if !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_row_follows_the_last_known_row() {
        let planner = RangePlanner::new("Downloads");
        for n in [0usize, 1, 2, 3, 41, 999, 1_048_575] {
            let range = planner.plan(n);
            assert_eq!(range.start_row, n as u64 + 1);
            assert_eq!(range.end_row, Some(n as u64 + 1));
        }
    }

    #[test]
    fn empty_ledger_targets_row_one() {
        let range = RangePlanner::new("Downloads").plan(0);
        assert_eq!(range.to_a1(), "Downloads!A1:A1");
    }

    #[test]
    fn three_rows_plan_row_four() {
        let range = RangePlanner::new("Downloads").plan(3);
        assert_eq!(range.to_string(), "Downloads!A4:A4");
    }

    #[test]
    fn read_range_covers_the_whole_column() {
        let range = RangePlanner::new("Sheet1").read_range();
        assert_eq!(range.to_a1(), "Sheet1!A1:A");
    }

    #[test]
    fn sheet_names_needing_quotes_are_escaped() {
        assert_eq!(
            RangeDescriptor::single_row("My Downloads", 2).to_a1(),
            "'My Downloads'!A2:A2"
        );
        assert_eq!(
            RangeDescriptor::whole_column("Bob's").to_a1(),
            "'Bob''s'!A1:A"
        );
    }
}
