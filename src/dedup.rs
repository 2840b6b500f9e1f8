//! Duplicate-row removal keyed on (artist, title).

use anyhow::Result;
use log::info;
use rustc_hash::FxHashSet;

use crate::sheet::{CellUpdate, ColumnMap, SheetStore};

/// Keep the first row per (artist, title) key. Row 1 is the header and is
/// always kept. Keys are trimmed; comparison is case-insensitive unless
/// `case_sensitive` is set. Rows with an empty artist and title are kept
/// as-is (blank spacer rows are not "duplicates" of each other).
pub fn dedup_rows(rows: &[Vec<String>], columns: &ColumnMap, case_sensitive: bool) -> Vec<Vec<String>> {
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    let mut kept = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        if idx == 0 {
            kept.push(row.clone());
            continue;
        }
        let cell = |col: usize| row.get(col).map(|s| s.trim()).unwrap_or("");
        let (artist, title) = (cell(columns.artist), cell(columns.title));
        if artist.is_empty() && title.is_empty() {
            kept.push(row.clone());
            continue;
        }
        let key = if case_sensitive {
            (artist.to_string(), title.to_string())
        } else {
            (artist.to_lowercase(), title.to_lowercase())
        };
        if seen.insert(key) {
            kept.push(row.clone());
        } else {
            info!("dropping duplicate row {}: {artist} / {title}", idx + 1);
        }
    }
    kept
}

/// Rewrite the sheet without duplicate rows: clear, then one batch write of
/// the compacted rows. Returns how many rows were removed.
pub fn run_dedup<S: SheetStore>(sheet: &mut S, columns: &ColumnMap, case_sensitive: bool) -> Result<usize> {
    let rows = sheet.read_all_rows()?;
    let kept = dedup_rows(&rows, columns, case_sensitive);
    let removed = rows.len() - kept.len();
    if removed == 0 {
        info!("no duplicate rows found");
        return Ok(0);
    }

    let mut updates = Vec::new();
    for (idx, row) in kept.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                updates.push(CellUpdate { row: idx + 1, col, value: value.clone() });
            }
        }
    }
    sheet.clear()?;
    sheet.batch_write(&updates)?;
    info!("removed {removed} duplicate row(s), {} row(s) kept", kept.len());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::MemorySheet;

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_first_row_wins() {
        let input = rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One", "", "link-kept"],
            &["artist a", "song one", "", "link-dropped"],
            &["Artist B", "Song Two"],
        ]);
        let kept = dedup_rows(&input, &ColumnMap::default(), false);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1][3], "link-kept");
        assert_eq!(kept[2][0], "Artist B");
    }

    #[test]
    fn test_case_sensitive_keeps_both() {
        let input = rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One"],
            &["artist a", "song one"],
        ]);
        let kept = dedup_rows(&input, &ColumnMap::default(), true);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_blank_rows_kept() {
        let input = rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One"],
            &[],
            &[],
            &["Artist B", "Song Two"],
        ]);
        let kept = dedup_rows(&input, &ColumnMap::default(), false);
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn test_run_dedup_compacts_sheet() {
        let mut sheet = MemorySheet::from_rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One"],
            &["Artist A", "Song One"],
            &["Artist B", "Song Two"],
        ]);
        let removed = run_dedup(&mut sheet, &ColumnMap::default(), false).unwrap();
        assert_eq!(removed, 1);
        let rows = sheet.read_all_rows().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "Artist");
        assert_eq!(rows[1][0], "Artist A");
        assert_eq!(rows[2][0], "Artist B");
    }

    #[test]
    fn test_run_dedup_noop_leaves_sheet_alone() {
        let mut sheet = MemorySheet::from_rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One"],
        ]);
        let removed = run_dedup(&mut sheet, &ColumnMap::default(), false).unwrap();
        assert_eq!(removed, 0);
        // no clear/write cycle happened
        assert_eq!(sheet.write_calls, 0);
    }
}
